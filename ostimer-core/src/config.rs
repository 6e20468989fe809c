//! Timer configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimerError};

/// What happens to a start cycle after the user callback panics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Log and report the panic, keep firing
    #[default]
    Continue,
    /// Log and report the panic, skip every later fire until the next `start()`
    Suppress,
}

/// Which backend a timer built from configuration uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The OS facility for this target (timer-queue on Windows, timerfd on Linux)
    #[default]
    Platform,
    /// Portable worker thread backend
    Thread,
}

/// Timer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Re-arm after every expiration
    #[serde(default)]
    pub periodic: bool,

    /// Upper bound on a single worker wait, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub panic_policy: PanicPolicy,

    /// Capacity of the panic report channel
    #[serde(default = "default_report_capacity")]
    pub panic_report_capacity: usize,

    #[serde(default)]
    pub backend: BackendKind,
}

fn default_period_ms() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    1
}

fn default_report_capacity() -> usize {
    16
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            periodic: false,
            poll_interval_ms: default_poll_interval(),
            panic_policy: PanicPolicy::default(),
            panic_report_capacity: default_report_capacity(),
            backend: BackendKind::default(),
        }
    }
}

impl TimerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn periodic(mut self, periodic: bool) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn panic_policy(mut self, policy: PanicPolicy) -> Self {
        self.panic_policy = policy;
        self
    }

    pub fn panic_report_capacity(mut self, capacity: usize) -> Self {
        self.panic_report_capacity = capacity;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Configured period as a `Duration`
    pub fn period_duration(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Configured worker wait bound as a `Duration`
    pub fn poll_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject values no backend can work with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TimerError::InvalidConfig {
                reason: "poll_interval_ms must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms > i32::MAX as u64 {
            return Err(TimerError::InvalidConfig {
                reason: format!("poll_interval_ms {} is too large", self.poll_interval_ms),
            });
        }
        if self.panic_report_capacity == 0 {
            return Err(TimerError::InvalidConfig {
                reason: "panic_report_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TimerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}
