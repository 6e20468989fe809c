//! Public timer handle
//!
//! State machine:
//!
//! ```text
//! Constructed ──start()──▶ Running ──stop()──▶ Constructed ──drop──▶ Gone
//!      │                      │
//!      └──stop(): no-op       └──start(): AlreadyRunning
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::config::TimerConfig;
use crate::error::{Result, TimerError};

use super::backends;
use super::{
    ArmSpec, CallbackPanic, Dispatcher, Settings, Shared, TimerBackend, TimerCallback, TimerStats,
};

/// A one-shot or periodic OS timer with a user callback
///
/// The callback runs on a thread owned by the backend, never on the thread
/// that calls [`start`](Timer::start). `stop()` and drop wait for that
/// thread, so neither may be called from inside the callback.
pub struct Timer {
    shared: Arc<Shared>,
    backend: Box<dyn TimerBackend>,
}

impl Timer {
    /// Create a timer on the platform backend with default settings otherwise.
    pub fn new<F>(period: Duration, callback: F, periodic: bool) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let config = TimerConfig::new().periodic(periodic);
        config.validate()?;
        let backend = backends::open(config.backend, &config)?;
        Ok(Self::assemble(&config, period, Some(Arc::new(callback)), backend))
    }

    /// Create a timer from a configuration, opening the backend it names.
    pub fn from_config(config: &TimerConfig, callback: Option<TimerCallback>) -> Result<Self> {
        config.validate()?;
        let backend = backends::open(config.backend, config)?;
        Self::with_backend(config, callback, backend)
    }

    /// Create a timer on an already opened backend.
    pub fn with_backend(
        config: &TimerConfig,
        callback: Option<TimerCallback>,
        backend: Box<dyn TimerBackend>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, config.period_duration(), callback, backend))
    }

    fn assemble(
        config: &TimerConfig,
        period: Duration,
        callback: Option<TimerCallback>,
        backend: Box<dyn TimerBackend>,
    ) -> Self {
        tracing::debug!(
            backend = backend.name(),
            period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            periodic = config.periodic,
            "timer created"
        );

        let settings = Settings {
            period,
            periodic: config.periodic,
            callback,
        };

        Self {
            shared: Arc::new(Shared::new(
                settings,
                config.panic_policy,
                config.panic_report_capacity,
            )),
            backend,
        }
    }

    /// Arm the timer with the period and periodic flag configured right now.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) || self.backend.is_active() {
            return Err(TimerError::AlreadyRunning);
        }

        let spec = {
            let settings = self.shared.settings.lock();
            ArmSpec::new(settings.period, settings.periodic)
        };

        self.shared.suppressed.store(false, Ordering::Release);
        // Running must be visible before the first expiration can be dispatched.
        self.shared.running.store(true, Ordering::Release);

        if let Err(err) = self.backend.arm(spec, Dispatcher::new(self.shared.clone())) {
            self.shared.running.store(false, Ordering::Release);
            tracing::warn!(backend = self.backend.name(), error = %err, "timer failed to start");
            return Err(err);
        }

        self.shared.record_start();
        tracing::debug!(
            backend = self.backend.name(),
            initial_ms = spec.initial.as_millis() as u64,
            periodic = spec.is_periodic(),
            "timer started"
        );
        Ok(())
    }

    /// Disarm the timer and wait for the backend to confirm.
    ///
    /// A callback already running finishes; no new one starts after this
    /// returns. Calling `stop()` on a stopped timer does nothing.
    pub fn stop(&mut self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        self.backend.disarm();
        if was_running {
            tracing::debug!(backend = self.backend.name(), "timer stopped");
        }
    }

    pub fn period(&self) -> Duration {
        self.shared.settings.lock().period
    }

    /// Takes effect at the next `start()`.
    pub fn set_period(&self, period: Duration) {
        self.shared.settings.lock().period = period;
    }

    pub fn callback(&self) -> Option<TimerCallback> {
        self.shared.settings.lock().callback.clone()
    }

    /// Takes effect at the next expiration, even while running.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.settings.lock().callback = Some(Arc::new(callback));
    }

    /// Remove the callback; later expirations are skipped.
    pub fn clear_callback(&self) {
        self.shared.settings.lock().callback = None;
    }

    pub fn is_periodic(&self) -> bool {
        self.shared.settings.lock().periodic
    }

    /// Takes effect at the next `start()`.
    pub fn set_periodic(&self, periodic: bool) {
        self.shared.settings.lock().periodic = periodic;
    }

    /// True from a successful `start()` until `stop()`, including after a
    /// one-shot timer has fired.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> TimerStats {
        self.shared.stats()
    }

    /// Receiver for reports of panicking callbacks
    pub fn panic_reports(&self) -> Receiver<CallbackPanic> {
        self.shared.reports()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settings = self.shared.settings.lock();
        f.debug_struct("Timer")
            .field("backend", &self.backend.name())
            .field("period", &settings.period)
            .field("periodic", &settings.periodic)
            .field("has_callback", &settings.callback.is_some())
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
