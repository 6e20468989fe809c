//! Mock timer backend for testing
//!
//! Never fires on its own. Tests deliver expirations with
//! [`MockProbe::fire`], inspect what was armed, inject failures, and check
//! that every acquired resource was released.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, TimerError};
use crate::timing::{ArmSpec, Dispatcher, TimerBackend};

const BACKEND: &str = "mock";

/// Failure points a test can force
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    /// Acquiring the timer resource fails
    OpenTimer,
    /// Acquiring the event resource fails, after the timer resource succeeded
    OpenEvent,
    /// Arming fails
    Arm,
}

#[derive(Default)]
struct ProbeInner {
    live_resources: AtomicUsize,
    disarms: AtomicUsize,
    arms: Mutex<Vec<ArmSpec>>,
    faults: Mutex<Vec<MockFault>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

/// Test-side view of a mock backend
#[derive(Clone, Default)]
pub struct MockProbe {
    inner: Arc<ProbeInner>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later occurrence of `fault` fail until cleared
    pub fn inject(&self, fault: MockFault) {
        self.inner.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
    }

    /// Resources acquired and not yet released
    pub fn live_resources(&self) -> usize {
        self.inner.live_resources.load(Ordering::SeqCst)
    }

    /// Every `ArmSpec` the backend accepted, oldest first
    pub fn arms(&self) -> Vec<ArmSpec> {
        self.inner.arms.lock().clone()
    }

    /// Number of disarms of an armed backend
    pub fn disarm_count(&self) -> usize {
        self.inner.disarms.load(Ordering::SeqCst)
    }

    pub fn is_armed(&self) -> bool {
        self.inner.dispatcher.lock().is_some()
    }

    /// Deliver one expiration on the calling thread.
    ///
    /// Returns false when the backend is not armed.
    pub fn fire(&self) -> bool {
        let dispatcher = self.inner.dispatcher.lock().clone();
        match dispatcher {
            Some(dispatcher) => {
                dispatcher.dispatch();
                true
            }
            None => false,
        }
    }

    fn check(&self, fault: MockFault, reason: &str) -> io::Result<()> {
        if self.inner.faults.lock().contains(&fault) {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, reason.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MockProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProbe")
            .field("live_resources", &self.live_resources())
            .field("armed", &self.is_armed())
            .field("arms", &self.inner.arms.lock().len())
            .finish()
    }
}

/// A counted stand-in for an OS handle
struct MockResource {
    probe: Arc<ProbeInner>,
}

impl MockResource {
    fn acquire(probe: &MockProbe) -> Self {
        probe.inner.live_resources.fetch_add(1, Ordering::SeqCst);
        Self {
            probe: probe.inner.clone(),
        }
    }
}

impl Drop for MockResource {
    fn drop(&mut self) {
        self.probe.live_resources.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock backend that records what it is asked to do
pub struct MockTimerBackend {
    probe: MockProbe,
    _timer: MockResource,
    _event: MockResource,
    armed: bool,
}

impl MockTimerBackend {
    /// Acquire a timer resource, then an event resource, like the timerfd backend.
    pub fn open(probe: &MockProbe) -> Result<Self> {
        probe
            .check(MockFault::OpenTimer, "simulated timer exhaustion")
            .map_err(|e| TimerError::init(BACKEND, "timer resource", e))?;
        let timer = MockResource::acquire(probe);

        probe
            .check(MockFault::OpenEvent, "simulated event exhaustion")
            .map_err(|e| TimerError::init(BACKEND, "event resource", e))?;
        let event = MockResource::acquire(probe);

        Ok(Self {
            probe: probe.clone(),
            _timer: timer,
            _event: event,
            armed: false,
        })
    }
}

impl TimerBackend for MockTimerBackend {
    fn arm(&mut self, spec: ArmSpec, dispatcher: Dispatcher) -> Result<()> {
        self.probe
            .check(MockFault::Arm, "simulated arm failure")
            .map_err(|e| TimerError::start(BACKEND, "arm", e))?;

        self.probe.inner.arms.lock().push(spec);
        *self.probe.inner.dispatcher.lock() = Some(dispatcher);
        self.armed = true;
        Ok(())
    }

    fn disarm(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        self.probe.inner.dispatcher.lock().take();
        self.probe.inner.disarms.fetch_add(1, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.armed
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

impl std::fmt::Debug for MockTimerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTimerBackend")
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for MockTimerBackend {
    fn drop(&mut self) {
        self.disarm();
    }
}
