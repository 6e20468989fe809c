//! Linux timerfd backend
//!
//! A `CLOCK_MONOTONIC` timerfd is registered with an epoll instance. Each
//! start cycle spawns a worker that waits on the epoll descriptor with a
//! bounded timeout, drains the expiration count when the timerfd becomes
//! readable and dispatches the callback inline. The bounded wait lets the
//! worker notice cancellation within `poll_interval_ms`.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::TimerConfig;
use crate::error::{Result, TimerError};
use crate::timing::{ArmSpec, Dispatcher, TimerBackend};

const BACKEND: &str = "timerfd";

/// Convert a libc return value into an `io::Result`
fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn to_timespec(duration: Duration) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    ts.tv_sec = libc::time_t::try_from(duration.as_secs()).unwrap_or(libc::time_t::MAX);
    ts.tv_nsec = duration.subsec_nanos() as libc::c_long;
    ts
}

/// `None` disarms. A zero initial delay would also disarm, so it becomes 1ns.
fn to_itimerspec(spec: Option<ArmSpec>) -> libc::itimerspec {
    let mut value: libc::itimerspec = unsafe { mem::zeroed() };
    if let Some(spec) = spec {
        value.it_value = to_timespec(spec.initial.max(Duration::from_nanos(1)));
        if let Some(interval) = spec.interval {
            value.it_interval = to_timespec(interval);
        }
    }
    value
}

/// The step that failed while acquiring descriptors
#[derive(Debug)]
struct OpenError {
    step: &'static str,
    source: io::Error,
}

/// The timerfd and the epoll instance watching it; closed on drop
struct Descriptors {
    timer: OwnedFd,
    epoll: OwnedFd,
}

fn at_step(step: &'static str) -> impl FnOnce(io::Error) -> OpenError {
    move |source| OpenError { step, source }
}

impl Descriptors {
    /// Anything acquired before a failing step is closed when it goes out of scope.
    fn open() -> std::result::Result<Self, OpenError> {
        let timer = cvt(unsafe {
            libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
        })
        .map_err(at_step("timerfd_create failed"))?;
        let timer = unsafe { OwnedFd::from_raw_fd(timer) };

        let epoll = cvt(unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) })
            .map_err(at_step("epoll_create1 failed"))?;
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll) };

        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: timer.as_raw_fd() as u64,
        };
        cvt(unsafe {
            libc::epoll_ctl(epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, timer.as_raw_fd(), &mut event)
        })
        .map_err(at_step("epoll_ctl(EPOLL_CTL_ADD) failed"))?;

        Ok(Self { timer, epoll })
    }

    fn set_time(&self, spec: Option<ArmSpec>) -> io::Result<()> {
        let value = to_itimerspec(spec);
        cvt(unsafe { libc::timerfd_settime(self.timer.as_raw_fd(), 0, &value, ptr::null_mut()) })?;
        Ok(())
    }

    /// Wait up to `timeout_ms` for the timerfd to become readable.
    fn wait(&self, timeout_ms: libc::c_int) -> bool {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 1];
        let ready = unsafe {
            libc::epoll_wait(self.epoll.as_raw_fd(), events.as_mut_ptr(), 1, timeout_ms)
        };
        // -1 is EINTR in practice; treat it like a timeout and re-check cancellation.
        ready > 0
    }

    /// Read and reset the expiration count; `None` if nothing expired.
    fn drain(&self) -> Option<u64> {
        let mut expirations: u64 = 0;
        let read = unsafe {
            libc::read(
                self.timer.as_raw_fd(),
                &mut expirations as *mut u64 as *mut libc::c_void,
                mem::size_of::<u64>(),
            )
        };
        (read == mem::size_of::<u64>() as isize).then_some(expirations)
    }
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

fn poll_loop(
    fds: Arc<Descriptors>,
    cancel: Arc<AtomicBool>,
    dispatcher: Dispatcher,
    timeout_ms: libc::c_int,
) {
    tracing::trace!(timer_fd = fds.timer.as_raw_fd(), "timerfd worker started");

    while !cancel.load(Ordering::Acquire) {
        if !fds.wait(timeout_ms) {
            continue;
        }
        if let Some(expirations) = fds.drain() {
            if expirations > 1 {
                tracing::trace!(expirations, "timerfd overrun, dispatching once");
            }
            dispatcher.dispatch();
        }
    }

    tracing::trace!(timer_fd = fds.timer.as_raw_fd(), "timerfd worker exiting");
}

/// timerfd + epoll timer backend
pub struct TimerFdBackend {
    /// `None` after a failed arm released them; the next arm reopens.
    fds: Option<Arc<Descriptors>>,
    worker: Option<Worker>,
    poll_timeout_ms: libc::c_int,
}

impl TimerFdBackend {
    pub fn open(config: &TimerConfig) -> Result<Self> {
        let fds = Descriptors::open().map_err(|e| TimerError::init(BACKEND, e.step, e.source))?;

        tracing::debug!(
            timer_fd = fds.timer.as_raw_fd(),
            epoll_fd = fds.epoll.as_raw_fd(),
            "timerfd backend opened"
        );

        Ok(Self {
            fds: Some(Arc::new(fds)),
            worker: None,
            poll_timeout_ms: libc::c_int::try_from(config.poll_duration().as_millis().max(1))
                .unwrap_or(libc::c_int::MAX),
        })
    }
}

impl TimerBackend for TimerFdBackend {
    fn arm(&mut self, spec: ArmSpec, dispatcher: Dispatcher) -> Result<()> {
        let fds = match self.fds.clone() {
            Some(fds) => fds,
            None => {
                let fds = Descriptors::open()
                    .map_err(|e| TimerError::start(BACKEND, e.step, e.source))?;
                let fds = Arc::new(fds);
                self.fds = Some(fds.clone());
                fds
            }
        };

        if let Err(e) = fds.set_time(Some(spec)) {
            self.fds = None;
            return Err(TimerError::start(BACKEND, "timerfd_settime failed", e));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let spawned = thread::Builder::new().name("ostimer-timerfd".to_string()).spawn({
            let fds = fds.clone();
            let cancel = cancel.clone();
            let timeout_ms = self.poll_timeout_ms;
            move || poll_loop(fds, cancel, dispatcher, timeout_ms)
        });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker { cancel, handle });
                Ok(())
            }
            Err(e) => {
                if let Err(e) = fds.set_time(None) {
                    tracing::warn!(error = %e, "failed to disarm timerfd after spawn failure");
                }
                Err(TimerError::start(BACKEND, "failed to spawn worker thread", e))
            }
        }
    }

    fn disarm(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.store(true, Ordering::Release);

            if worker.handle.thread().id() == thread::current().id() {
                tracing::error!(
                    "timerfd timer stopped from its own callback, worker left detached"
                );
            } else if worker.handle.join().is_err() {
                tracing::error!("timerfd worker panicked");
            }
        }

        if let Some(fds) = &self.fds {
            if let Err(e) = fds.set_time(None) {
                tracing::warn!(error = %e, "failed to disarm timerfd");
            }
            // Drop a pending expiration so it cannot leak into the next start cycle.
            fds.drain();
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

impl Drop for TimerFdBackend {
    fn drop(&mut self) {
        self.disarm();
        tracing::debug!("timerfd backend closed");
    }
}
