//! # Timer primitive
//!
//! One [`Timer`] owns one backend and one optional callback. The backend
//! turns OS timer expirations into calls on a [`Dispatcher`], which reads
//! the current callback and runs it on the backend's thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              Timer                                  │
//! │  • period / periodic / callback behind a mutex                      │
//! │  • running flag (atomic)                                            │
//! │  • start() snapshots the settings into an ArmSpec                   │
//! └────────────────────────────────┬────────────────────────────────────┘
//!                                  │ arm(ArmSpec, Dispatcher) / disarm()
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       TimerBackend (trait)                          │
//! ├───────────────┬──────────────────┬───────────────┬──────────────────┤
//! │ TimerQueue    │ TimerFd          │ Thread        │ Mock             │
//! │ (Windows)     │ (Linux, epoll)   │ (portable)    │ (testing)        │
//! └───────────────┴──────────────────┴───────────────┴──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ostimer_core::Timer;
//!
//! let ticks = Arc::new(AtomicU32::new(0));
//! let counter = ticks.clone();
//!
//! let mut timer = Timer::new(
//!     Duration::from_millis(50),
//!     move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     },
//!     true,
//! )?;
//!
//! timer.start()?;
//! std::thread::sleep(Duration::from_millis(260));
//! timer.stop();
//!
//! println!("fired {} times", ticks.load(Ordering::Relaxed));
//! # Ok::<(), ostimer_core::TimerError>(())
//! ```

pub mod backends;
pub mod timer;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::PanicPolicy;
use crate::error::Result;

pub use backends::{MockFault, MockProbe, MockTimerBackend, PlatformBackend, ThreadBackend};
pub use timer::Timer;

/// User callback invoked on every expiration
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Abstract timer backend
///
/// A backend owns the OS resources behind one timer. Implementations must
/// deliver every expiration through the [`Dispatcher`] handed to
/// [`arm`](TimerBackend::arm) and must release all resources on drop.
pub trait TimerBackend: Send {
    /// Arm the timer. Called only while the backend is not active.
    fn arm(&mut self, spec: ArmSpec, dispatcher: Dispatcher) -> Result<()>;

    /// Disarm the timer and wait until no dispatch is in progress.
    ///
    /// Must be idempotent and must not fail.
    fn disarm(&mut self);

    /// Whether a registration or worker is currently active
    fn is_active(&self) -> bool;

    /// Backend name (for logging)
    fn name(&self) -> &'static str;
}

/// Arming parameters snapshotted by `Timer::start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmSpec {
    /// Delay until the first expiration
    pub initial: Duration,
    /// Delay between later expirations; `None` for a one-shot timer
    pub interval: Option<Duration>,
}

impl ArmSpec {
    /// A zero period fires once, as soon as possible, whatever `periodic` says.
    pub fn new(period: Duration, periodic: bool) -> Self {
        if period.is_zero() {
            return Self {
                initial: Duration::ZERO,
                interval: None,
            };
        }
        Self {
            initial: period,
            interval: periodic.then_some(period),
        }
    }

    pub fn is_periodic(&self) -> bool {
        self.interval.is_some()
    }
}

/// Report of a callback that panicked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallbackPanic {
    /// Panic message, when the payload was a string
    pub message: String,
    /// 1-based index of the invocation that panicked
    pub fire_index: u64,
}

/// Snapshot of a timer's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    /// Successful `start()` calls
    pub starts: u64,
    /// Callback invocations
    pub fires: u64,
    /// Expirations that did not invoke the callback
    pub skipped: u64,
    /// Callback invocations that panicked
    pub panics: u64,
}

/// Mutable configuration, read by `start()` and by every dispatch
pub(crate) struct Settings {
    pub(crate) period: Duration,
    pub(crate) periodic: bool,
    pub(crate) callback: Option<TimerCallback>,
}

#[derive(Default)]
struct Counters {
    starts: AtomicU64,
    fires: AtomicU64,
    skipped: AtomicU64,
    panics: AtomicU64,
}

/// State shared between a `Timer` and the thread that runs its callback
pub(crate) struct Shared {
    pub(crate) settings: Mutex<Settings>,
    pub(crate) running: AtomicBool,
    /// Set after a panic under `PanicPolicy::Suppress`, cleared by `start()`
    pub(crate) suppressed: AtomicBool,
    policy: PanicPolicy,
    counters: Counters,
    reports_tx: Sender<CallbackPanic>,
    reports_rx: Receiver<CallbackPanic>,
}

impl Shared {
    pub(crate) fn new(settings: Settings, policy: PanicPolicy, report_capacity: usize) -> Self {
        let (reports_tx, reports_rx) = channel::bounded(report_capacity);
        Self {
            settings: Mutex::new(settings),
            running: AtomicBool::new(false),
            suppressed: AtomicBool::new(false),
            policy,
            counters: Counters::default(),
            reports_tx,
            reports_rx,
        }
    }

    pub(crate) fn record_start(&self) {
        self.counters.starts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> TimerStats {
        TimerStats {
            starts: self.counters.starts.load(Ordering::Relaxed),
            fires: self.counters.fires.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reports(&self) -> Receiver<CallbackPanic> {
        self.reports_rx.clone()
    }

    fn on_panic(&self, fire_index: u64, payload: Box<dyn Any + Send>) {
        self.counters.panics.fetch_add(1, Ordering::Relaxed);
        let message = panic_message(payload.as_ref());

        tracing::error!(
            fire_index,
            panic = %message,
            policy = ?self.policy,
            "timer callback panicked"
        );

        if self.policy == PanicPolicy::Suppress {
            self.suppressed.store(true, Ordering::Release);
        }

        let report = CallbackPanic { message, fire_index };
        if let Err(TrySendError::Full(report)) = self.reports_tx.try_send(report) {
            tracing::warn!(
                fire_index = report.fire_index,
                "panic report channel full, report dropped"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle through which a backend delivers expirations
///
/// Cloning is cheap; every clone refers to the same timer.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Deliver one expiration.
    ///
    /// Reads the callback configured right now and runs it on the calling
    /// thread. Skips the call when the timer is stopped, suppressed, or has
    /// no callback. A panicking callback is caught and handled according to
    /// the timer's `PanicPolicy`; it never unwinds into the backend.
    pub fn dispatch(&self) {
        let shared = &*self.shared;

        if !shared.running.load(Ordering::Acquire) || shared.suppressed.load(Ordering::Acquire) {
            shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("expiration skipped, timer stopped or suppressed");
            return;
        }

        // Clone out of the lock so a slow callback never blocks set_callback().
        let callback = shared.settings.lock().callback.clone();
        let Some(callback) = callback else {
            shared.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let fire_index = shared.counters.fires.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            shared.on_panic(fire_index, payload);
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .finish()
    }
}
