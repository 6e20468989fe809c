//! # ostimer - cross-platform OS timers
//!
//! One primitive: run a callback once, or every period, after a configurable
//! interval, with explicit start and stop.
//!
//! - **Windows**: an OS timer-queue; the callback runs on a pool thread.
//! - **Linux**: a `timerfd` watched by `epoll` from a dedicated worker thread.
//! - **Elsewhere**: a dedicated worker thread with a deadline wait.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ostimer_core::Timer;
//!
//! let fired = Arc::new(AtomicBool::new(false));
//! let flag = fired.clone();
//!
//! let mut timer = Timer::new(
//!     Duration::from_millis(10),
//!     move || flag.store(true, Ordering::SeqCst),
//!     false,
//! )
//! .unwrap();
//!
//! timer.start().unwrap();
//! std::thread::sleep(Duration::from_millis(100));
//! timer.stop();
//!
//! assert!(fired.load(Ordering::SeqCst));
//! ```

pub mod config;
pub mod error;
pub mod timing;

#[cfg(feature = "ffi")]
pub mod ffi;

// Re-export main types
pub use config::{BackendKind, PanicPolicy, TimerConfig};
pub use error::{ErrorCategory, ErrorDetail, ErrorResponse, Result, TimerError};
pub use timing::{
    ArmSpec, CallbackPanic, Dispatcher, MockFault, MockProbe, MockTimerBackend, PlatformBackend,
    ThreadBackend, Timer, TimerBackend, TimerCallback, TimerStats,
};
