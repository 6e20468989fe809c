//! Failure paths driven through the mock backend.
//!
//! Every test checks that no acquired resource outlives its owner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ostimer_core::{
    ArmSpec, ErrorCategory, MockFault, MockProbe, MockTimerBackend, PanicPolicy, Timer,
    TimerCallback, TimerConfig, TimerError,
};

fn counter() -> (Arc<AtomicU64>, TimerCallback) {
    let count = Arc::new(AtomicU64::new(0));
    let c = count.clone();
    (
        count,
        Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

fn mock_timer(probe: &MockProbe, config: &TimerConfig, callback: Option<TimerCallback>) -> Timer {
    let backend = MockTimerBackend::open(probe).expect("mock backend should open");
    Timer::with_backend(config, callback, Box::new(backend)).unwrap()
}

#[test]
fn test_open_timer_failure_leaks_nothing() {
    let probe = MockProbe::new();
    probe.inject(MockFault::OpenTimer);

    let err = MockTimerBackend::open(&probe)
        .err()
        .expect("open should fail");
    assert_eq!(err.category(), ErrorCategory::Initialization);
    assert_eq!(err.error_code(), "TIMER_INIT_FAILED");
    assert_eq!(probe.live_resources(), 0);
}

/// Open a mock backend and build a timer on it, the way `Timer::from_config`
/// composes backend open and timer assembly.
fn timer_on_probe(probe: &MockProbe, config: &TimerConfig) -> ostimer_core::Result<Timer> {
    let backend = MockTimerBackend::open(probe)?;
    Timer::with_backend(config, None, Box::new(backend))
}

#[test]
fn test_timer_construction_fails_when_backend_cannot_open() {
    for fault in [MockFault::OpenTimer, MockFault::OpenEvent] {
        let probe = MockProbe::new();
        probe.inject(fault);

        let err = timer_on_probe(&probe, &TimerConfig::new())
            .err()
            .expect("construction should fail");
        assert!(matches!(err, TimerError::Initialization { .. }), "{:?}", fault);
        assert!(!err.is_recoverable());
        assert_eq!(probe.live_resources(), 0, "{:?}", fault);
    }

    let probe = MockProbe::new();
    let timer = timer_on_probe(&probe, &TimerConfig::new()).unwrap();
    assert_eq!(probe.live_resources(), 2);
    drop(timer);
    assert_eq!(probe.live_resources(), 0);
}

#[test]
fn test_open_event_failure_releases_timer_resource() {
    let probe = MockProbe::new();
    probe.inject(MockFault::OpenEvent);

    let err = MockTimerBackend::open(&probe)
        .err()
        .expect("open should fail");
    assert!(matches!(err, TimerError::Initialization { .. }));
    assert_eq!(probe.live_resources(), 0);

    probe.clear_faults();
    let backend = MockTimerBackend::open(&probe).unwrap();
    assert_eq!(probe.live_resources(), 2);
    drop(backend);
    assert_eq!(probe.live_resources(), 0);
}

#[test]
fn test_arm_failure_leaves_timer_stopped_and_restartable() {
    let probe = MockProbe::new();
    let (count, callback) = counter();
    let mut timer = mock_timer(&probe, &TimerConfig::new().periodic(true), Some(callback));

    probe.inject(MockFault::Arm);
    let err = timer.start().unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(err.error_code(), "TIMER_START_FAILED");
    assert!(!timer.is_running());
    assert!(!probe.fire());

    probe.clear_faults();
    timer.start().unwrap();
    assert!(probe.fire());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    drop(timer);
    assert_eq!(probe.live_resources(), 0);
}

#[test]
fn test_start_snapshots_period_and_mode() {
    let probe = MockProbe::new();
    let config = TimerConfig::new().period(Duration::from_millis(250));
    let mut timer = mock_timer(&probe, &config, None);

    timer.start().unwrap();
    timer.stop();
    timer.set_period(Duration::from_millis(40));
    timer.set_periodic(true);
    timer.start().unwrap();
    timer.stop();
    timer.set_period(Duration::ZERO);
    timer.start().unwrap();

    assert_eq!(
        probe.arms(),
        vec![
            ArmSpec {
                initial: Duration::from_millis(250),
                interval: None
            },
            ArmSpec {
                initial: Duration::from_millis(40),
                interval: Some(Duration::from_millis(40))
            },
            ArmSpec {
                initial: Duration::ZERO,
                interval: None
            },
        ]
    );
}

#[test]
fn test_stop_blocks_later_expirations() {
    let probe = MockProbe::new();
    let (count, callback) = counter();
    let mut timer = mock_timer(&probe, &TimerConfig::new().periodic(true), Some(callback));

    timer.start().unwrap();
    probe.fire();
    probe.fire();
    timer.stop();

    assert!(!probe.fire());
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(probe.disarm_count(), 1);

    // A second stop does not disarm again.
    timer.stop();
    assert_eq!(probe.disarm_count(), 1);
}

#[test]
fn test_panic_with_continue_policy_keeps_firing() {
    let probe = MockProbe::new();
    let calls = Arc::new(AtomicU64::new(0));
    let c = calls.clone();
    let callback: TimerCallback = Arc::new(move || {
        if c.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("first tick failed");
        }
    });
    let mut timer = mock_timer(&probe, &TimerConfig::new().periodic(true), Some(callback));
    let reports = timer.panic_reports();

    timer.start().unwrap();
    for _ in 0..3 {
        probe.fire();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let report = reports.try_recv().unwrap();
    assert_eq!(report.fire_index, 1);
    assert!(report.message.contains("first tick failed"));
    assert!(reports.try_recv().is_err());

    let stats = timer.stats();
    assert_eq!(stats.fires, 3);
    assert_eq!(stats.panics, 1);
    assert!(timer.is_running());
}

#[test]
fn test_panic_with_suppress_policy_until_restart() {
    let probe = MockProbe::new();
    let calls = Arc::new(AtomicU64::new(0));
    let c = calls.clone();
    let callback: TimerCallback = Arc::new(move || {
        c.fetch_add(1, Ordering::SeqCst);
        panic!("always fails");
    });
    let config = TimerConfig::new()
        .periodic(true)
        .panic_policy(PanicPolicy::Suppress);
    let mut timer = mock_timer(&probe, &config, Some(callback));

    timer.start().unwrap();
    probe.fire();
    probe.fire();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(timer.stats().skipped, 1);

    timer.stop();
    timer.start().unwrap();
    probe.fire();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_full_report_channel_drops_reports() {
    let probe = MockProbe::new();
    let callback: TimerCallback = Arc::new(|| panic!("boom"));
    let config = TimerConfig::new()
        .periodic(true)
        .panic_report_capacity(1);
    let mut timer = mock_timer(&probe, &config, Some(callback));
    let reports = timer.panic_reports();

    timer.start().unwrap();
    for _ in 0..4 {
        probe.fire();
    }

    assert_eq!(timer.stats().panics, 4);
    assert_eq!(reports.try_iter().count(), 1);
}

#[test]
fn test_invalid_config_rejected_before_backend_use() {
    let probe = MockProbe::new();
    let backend = MockTimerBackend::open(&probe).unwrap();
    let config = TimerConfig::new().panic_report_capacity(0);

    let err = Timer::with_backend(&config, None, Box::new(backend)).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(probe.live_resources(), 0);
}
