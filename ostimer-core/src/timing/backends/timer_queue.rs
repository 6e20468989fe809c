//! Windows timer-queue backend
//!
//! Each timer owns a private timer-queue. Arming registers one timer-queue
//! timer whose expirations run [`timer_trampoline`] on an OS pool thread.
//! Disarming deletes the registration and the queue, waiting for running
//! callbacks, then creates a fresh queue so the timer can start again.

use std::io;
use std::ptr;
use std::time::Duration;

use winapi::shared::minwindef::DWORD;
use winapi::shared::ntdef::{BOOLEAN, HANDLE, PVOID};
use winapi::um::handleapi::INVALID_HANDLE_VALUE;
use winapi::um::threadpoollegacyapiset::{
    CreateTimerQueue, CreateTimerQueueTimer, DeleteTimerQueueEx, DeleteTimerQueueTimer,
};
use winapi::um::winnt::WT_EXECUTEDEFAULT;

use crate::config::TimerConfig;
use crate::error::{Result, TimerError};
use crate::timing::{ArmSpec, Dispatcher, TimerBackend};

const BACKEND: &str = "timer-queue";

/// Owned Win32 handle
struct Handle(HANDLE);

// Timer-queue handles are not tied to the thread that created them.
unsafe impl Send for Handle {}

fn create_queue() -> io::Result<Handle> {
    let queue = unsafe { CreateTimerQueue() };
    if queue.is_null() {
        Err(io::Error::last_os_error())
    } else {
        Ok(Handle(queue))
    }
}

/// Whole milliseconds, rounding any fraction up so the timer never fires early.
fn to_millis(duration: Duration) -> DWORD {
    if duration.is_zero() {
        return 0;
    }
    let ms = duration.as_nanos().div_ceil(1_000_000);
    // u32::MAX is INFINITE for the OS.
    DWORD::try_from(ms).unwrap_or(DWORD::MAX - 1).clamp(1, DWORD::MAX - 1)
}

/// OS pool thread entry point; `parameter` is the armed `Dispatcher`.
unsafe extern "system" fn timer_trampoline(parameter: PVOID, _timer_fired: BOOLEAN) {
    if parameter.is_null() {
        return;
    }
    // Valid until disarm, which waits for this function to return.
    let dispatcher = &*(parameter as *const Dispatcher);
    // dispatch() catches callback panics, nothing unwinds across this frame.
    dispatcher.dispatch();
}

/// Timer-queue timer backend
pub struct TimerQueueBackend {
    /// `None` only if recreating the queue after a disarm failed.
    queue: Option<Handle>,
    timer: Option<Handle>,
    /// Boxed so the address handed to the OS stays put.
    dispatcher: Option<Box<Dispatcher>>,
}

impl TimerQueueBackend {
    pub fn open(_config: &TimerConfig) -> Result<Self> {
        let queue = create_queue()
            .map_err(|e| TimerError::init(BACKEND, "CreateTimerQueue failed", e))?;
        tracing::debug!("timer-queue backend opened");
        Ok(Self {
            queue: Some(queue),
            timer: None,
            dispatcher: None,
        })
    }

    /// Delete the registration and the queue, blocking until callbacks finish.
    fn release(&mut self, recreate: bool) {
        let Some(queue) = self.queue.take() else {
            return;
        };

        if let Some(timer) = self.timer.take() {
            if unsafe { DeleteTimerQueueTimer(queue.0, timer.0, INVALID_HANDLE_VALUE) } == 0 {
                tracing::warn!(error = %io::Error::last_os_error(), "DeleteTimerQueueTimer failed");
            }
        }
        if unsafe { DeleteTimerQueueEx(queue.0, INVALID_HANDLE_VALUE) } == 0 {
            tracing::warn!(error = %io::Error::last_os_error(), "DeleteTimerQueueEx failed");
        }
        // No callback can be running any more.
        self.dispatcher = None;

        if recreate {
            match create_queue() {
                Ok(queue) => self.queue = Some(queue),
                Err(e) => {
                    tracing::warn!(error = %e, "CreateTimerQueue failed, next start will retry")
                }
            }
        }
    }
}

impl TimerBackend for TimerQueueBackend {
    fn arm(&mut self, spec: ArmSpec, dispatcher: Dispatcher) -> Result<()> {
        let queue = match self.queue.as_ref().map(|queue| queue.0) {
            Some(queue) => queue,
            None => {
                let queue = create_queue()
                    .map_err(|e| TimerError::start(BACKEND, "CreateTimerQueue failed", e))?;
                let raw = queue.0;
                self.queue = Some(queue);
                raw
            }
        };

        let dispatcher = Box::new(dispatcher);
        let parameter = &*dispatcher as *const Dispatcher as PVOID;
        let due = to_millis(spec.initial);
        let period = spec.interval.map(to_millis).unwrap_or(0);

        let mut timer: HANDLE = ptr::null_mut();
        let created = unsafe {
            CreateTimerQueueTimer(
                &mut timer,
                queue,
                Some(timer_trampoline),
                parameter,
                due,
                period,
                WT_EXECUTEDEFAULT,
            )
        };
        if created == 0 {
            return Err(TimerError::start(
                BACKEND,
                "CreateTimerQueueTimer failed",
                io::Error::last_os_error(),
            ));
        }

        self.timer = Some(Handle(timer));
        self.dispatcher = Some(dispatcher);
        Ok(())
    }

    fn disarm(&mut self) {
        if self.timer.is_some() {
            self.release(true);
        }
    }

    fn is_active(&self) -> bool {
        self.timer.is_some()
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

impl Drop for TimerQueueBackend {
    fn drop(&mut self) {
        self.release(false);
        tracing::debug!("timer-queue backend closed");
    }
}
