//! Error types for timer operations
//!
//! Timer failures are few and surface synchronously to the caller of the
//! failing operation:
//!
//! - **Initialization**: backend resource acquisition failed while the timer
//!   was being constructed. The timer does not exist.
//! - **Start**: arming the backend failed. The timer stays stopped and can be
//!   started again.
//! - **Configuration**: a `TimerConfig` could not be read or is invalid.
//!
//! `stop()` and the accessors never fail. Errors are never retried inside
//! the crate; whether to retry is the caller's decision, guided by
//! [`TimerError::is_recoverable`].
//!
//! # Example
//!
//! ```rust
//! use ostimer_core::error::{ErrorCategory, TimerError};
//!
//! fn report(err: &TimerError) {
//!     match err.category() {
//!         ErrorCategory::Initialization => eprintln!("no timer: {}", err),
//!         ErrorCategory::Start => eprintln!("could not arm: {}", err),
//!         ErrorCategory::Configuration => eprintln!("bad config: {}", err),
//!     }
//! }
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for timer operations
pub type Result<T> = std::result::Result<T, TimerError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Backend setup failed at construction
    Initialization,
    /// Arming failed at start
    Start,
    /// Configuration could not be loaded or validated
    Configuration,
}

/// Errors that can occur in timer operations
#[derive(Error, Debug)]
pub enum TimerError {
    /// A backend resource could not be acquired while constructing the timer
    #[error("Failed to initialize {backend} timer backend: {reason} ({source})")]
    Initialization {
        backend: &'static str,
        reason: String,
        #[source]
        source: io::Error,
    },

    /// The backend refused to arm the timer
    #[error("Failed to start {backend} timer: {reason} ({source})")]
    Start {
        backend: &'static str,
        reason: String,
        #[source]
        source: io::Error,
    },

    /// `start()` was called on a timer that is already running
    #[error("Timer is already running. Call stop() before starting it again.")]
    AlreadyRunning,

    /// Configuration values are out of range
    #[error("Invalid timer configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Configuration file could not be read
    #[error("Failed to read timer configuration: {0}")]
    ConfigIo(#[from] io::Error),

    /// Configuration file is not valid JSON
    #[error("Failed to parse timer configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl TimerError {
    pub(crate) fn init(
        backend: &'static str,
        reason: impl Into<String>,
        source: io::Error,
    ) -> Self {
        TimerError::Initialization {
            backend,
            reason: reason.into(),
            source,
        }
    }

    pub(crate) fn start(
        backend: &'static str,
        reason: impl Into<String>,
        source: io::Error,
    ) -> Self {
        TimerError::Start {
            backend,
            reason: reason.into(),
            source,
        }
    }

    /// Returns true if repeating the failed operation might succeed
    ///
    /// Start failures are usually transient resource pressure in the OS.
    /// Initialization failures leave no timer to retry on, and configuration
    /// errors need different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TimerError::Start { .. })
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            TimerError::Initialization { .. } => ErrorCategory::Initialization,
            TimerError::Start { .. } | TimerError::AlreadyRunning => ErrorCategory::Start,
            TimerError::InvalidConfig { .. }
            | TimerError::ConfigIo(_)
            | TimerError::ConfigParse(_) => ErrorCategory::Configuration,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            TimerError::Initialization { .. } => "TIMER_INIT_FAILED",
            TimerError::Start { .. } => "TIMER_START_FAILED",
            TimerError::AlreadyRunning => "TIMER_ALREADY_RUNNING",
            TimerError::InvalidConfig { .. } => "INVALID_CONFIG",
            TimerError::ConfigIo(_) => "CONFIG_IO_ERROR",
            TimerError::ConfigParse(_) => "CONFIG_PARSE_ERROR",
        }
    }

    /// Converts this error to a JSON-serializable report
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                recoverable: self.is_recoverable(),
            },
        }
    }
}

/// JSON-serializable error report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail for JSON reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "TIMER_START_FAILED")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    pub category: ErrorCategory,
    /// Whether retry might succeed
    pub recoverable: bool,
}
