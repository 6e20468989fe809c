//! Portable worker thread backend
//!
//! Spawns one thread per start cycle. The thread sleeps on a stop channel
//! with a deadline: a timeout is an expiration, a message or a hang-up is
//! the stop signal. Works on every target with `std::thread`.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::TimerConfig;
use crate::error::{Result, TimerError};
use crate::timing::{ArmSpec, Dispatcher, TimerBackend};

const BACKEND: &str = "thread";

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Standard library timer backend
pub struct ThreadBackend {
    worker: Option<Worker>,
}

impl ThreadBackend {
    /// Nothing to acquire until the timer is armed.
    pub fn open(_config: &TimerConfig) -> Result<Self> {
        Ok(Self { worker: None })
    }

    pub fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for ThreadBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the deadline, or forever when there is none.
///
/// Returns true when the deadline passed, false on the stop signal.
fn wait_until(stop_rx: &Receiver<()>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => matches!(
            stop_rx.recv_deadline(deadline),
            Err(RecvTimeoutError::Timeout)
        ),
        // A message or a hang-up; either way the timer is stopping.
        None => {
            let _ = stop_rx.recv();
            false
        }
    }
}

/// The next deadline strictly after `now`, coalescing missed periods.
///
/// `None` means the deadline is beyond what `Instant` can represent.
fn next_deadline(deadline: Instant, interval: Duration, now: Instant) -> Option<Instant> {
    let next = deadline.checked_add(interval)?;
    if next > now {
        return Some(next);
    }
    // Skip every period that elapsed while the callback ran, as timerfd does.
    let behind = now.duration_since(next).as_nanos();
    let skipped = behind / interval.as_nanos() + 1;
    let skip = u32::try_from(skipped).ok().and_then(|n| interval.checked_mul(n))?;
    next.checked_add(skip)
}

fn run(spec: ArmSpec, stop_rx: Receiver<()>, dispatcher: Dispatcher) {
    // A zero interval would never wait; treat it as one-shot.
    let interval = spec.interval.filter(|interval| !interval.is_zero());
    let mut deadline = Instant::now().checked_add(spec.initial);
    if deadline.is_none() {
        tracing::debug!("thread timer delay out of range, timer will never expire");
    }

    while wait_until(&stop_rx, deadline) {
        dispatcher.dispatch();

        let (Some(interval), Some(current)) = (interval, deadline) else {
            break;
        };
        deadline = next_deadline(current, interval, Instant::now());
    }

    tracing::trace!("thread timer worker exiting");
}

impl TimerBackend for ThreadBackend {
    fn arm(&mut self, spec: ArmSpec, dispatcher: Dispatcher) -> Result<()> {
        let (stop_tx, stop_rx) = channel::bounded(1);

        let handle = thread::Builder::new()
            .name("ostimer-thread".to_string())
            .spawn(move || run(spec, stop_rx, dispatcher))
            .map_err(|e| TimerError::start(BACKEND, "failed to spawn worker thread", e))?;

        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    fn disarm(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        // The worker may already have exited after a one-shot fire.
        let _ = worker.stop_tx.try_send(());
        drop(worker.stop_tx);

        if worker.handle.thread().id() == thread::current().id() {
            tracing::error!("thread timer stopped from its own callback, worker left detached");
            return;
        }
        if worker.handle.join().is_err() {
            tracing::error!("thread timer worker panicked");
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

impl Drop for ThreadBackend {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PanicPolicy;
    use crate::timing::{Settings, Shared, TimerCallback};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn running_dispatcher(callback: TimerCallback) -> Dispatcher {
        let shared = Arc::new(Shared::new(
            Settings {
                period: Duration::from_millis(10),
                periodic: true,
                callback: Some(callback),
            },
            PanicPolicy::Continue,
            4,
        ));
        shared.running.store(true, Ordering::Release);
        Dispatcher::new(shared)
    }

    fn counter() -> (Arc<AtomicU32>, TimerCallback) {
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        (
            count,
            Arc::new(move || {
                count_clone.fetch_add(1, Ordering::Relaxed);
            }),
        )
    }

    #[test]
    fn test_thread_backend_one_shot() {
        let (count, callback) = counter();
        let mut backend = ThreadBackend::new();

        backend
            .arm(ArmSpec::new(Duration::from_millis(30), false), running_dispatcher(callback))
            .unwrap();
        assert!(backend.is_active());

        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::Relaxed), 1);

        backend.disarm();
        assert!(!backend.is_active());
    }

    #[test]
    fn test_thread_backend_disarm_before_fire() {
        let (count, callback) = counter();
        let mut backend = ThreadBackend::new();

        backend
            .arm(ArmSpec::new(Duration::from_millis(200), false), running_dispatcher(callback))
            .unwrap();

        let started = Instant::now();
        backend.disarm();

        assert!(started.elapsed() < Duration::from_millis(150));
        thread::sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_thread_backend_repeating() {
        let (count, callback) = counter();
        let mut backend = ThreadBackend::new();

        backend
            .arm(ArmSpec::new(Duration::from_millis(20), true), running_dispatcher(callback))
            .unwrap();

        thread::sleep(Duration::from_millis(110));
        backend.disarm();

        let fired = count.load(Ordering::Relaxed);
        assert!(fired >= 2, "Expected at least 2, got {}", fired);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::Relaxed), fired);
    }

    #[test]
    fn test_thread_backend_disarm_idle_is_noop() {
        let mut backend = ThreadBackend::new();
        backend.disarm();
        assert!(!backend.is_active());
    }

    #[test]
    fn test_thread_backend_unrepresentable_delay_never_fires() {
        let (count, callback) = counter();
        let mut backend = ThreadBackend::new();

        backend
            .arm(ArmSpec::new(Duration::MAX, true), running_dispatcher(callback))
            .unwrap();
        thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        backend.disarm();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!backend.is_active());
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_thread_backend_zero_interval_fires_once() {
        let (count, callback) = counter();
        let mut backend = ThreadBackend::new();
        let spec = ArmSpec {
            initial: Duration::from_millis(5),
            interval: Some(Duration::ZERO),
        };

        backend.arm(spec, running_dispatcher(callback)).unwrap();
        thread::sleep(Duration::from_millis(80));
        backend.disarm();

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_next_deadline_coalesces_missed_periods() {
        let start = Instant::now();
        let interval = Duration::from_millis(10);

        let next = next_deadline(start, interval, start).unwrap();
        assert_eq!(next, start + interval);

        let late = start + Duration::from_millis(35);
        let next = next_deadline(start, interval, late).unwrap();
        assert_eq!(next, start + Duration::from_millis(40));
    }

    #[test]
    fn test_next_deadline_out_of_range() {
        assert!(next_deadline(Instant::now(), Duration::MAX, Instant::now()).is_none());
    }
}
