//! Timer backend implementations
//!
//! - `TimerQueueBackend` (Windows): OS timer-queue, callback on a pool thread
//! - `TimerFdBackend` (Linux): timerfd + epoll, callback on a worker thread
//! - `ThreadBackend`: worker thread waiting on a channel deadline, any target
//! - `MockTimerBackend`: fires on demand, counts live resources, injects faults
//!
//! ## Choosing a Backend
//!
//! - **Default**: `PlatformBackend`, the OS facility for the target
//! - **Targets without one** (macOS, BSDs): `PlatformBackend` is `ThreadBackend`
//! - **Tests**: `MockTimerBackend`

mod mock;
mod thread;

#[cfg(target_os = "linux")]
mod timerfd;

#[cfg(windows)]
mod timer_queue;

pub use mock::{MockFault, MockProbe, MockTimerBackend};
pub use thread::ThreadBackend;

#[cfg(target_os = "linux")]
pub use timerfd::TimerFdBackend;

#[cfg(windows)]
pub use timer_queue::TimerQueueBackend;

use crate::config::{BackendKind, TimerConfig};
use crate::error::Result;
use crate::timing::TimerBackend;

/// The OS timer facility for this target
#[cfg(target_os = "linux")]
pub type PlatformBackend = TimerFdBackend;

/// The OS timer facility for this target
#[cfg(windows)]
pub type PlatformBackend = TimerQueueBackend;

/// The OS timer facility for this target
#[cfg(not(any(target_os = "linux", windows)))]
pub type PlatformBackend = ThreadBackend;

/// Open the backend named by `kind`
pub fn open(kind: BackendKind, config: &TimerConfig) -> Result<Box<dyn TimerBackend>> {
    match kind {
        BackendKind::Platform => Ok(Box::new(PlatformBackend::open(config)?)),
        BackendKind::Thread => Ok(Box::new(ThreadBackend::open(config)?)),
    }
}
