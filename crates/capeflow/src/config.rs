//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::BoardError;

/// GPIO line of the pause button (gpio2.5, header P8.9).
pub const DEFAULT_PAUSE_LINE: u32 = 69;
/// GPIO line of the mode button (gpio2.4, header P8.10).
pub const DEFAULT_MODE_LINE: u32 = 68;

const DEFAULT_DEBOUNCE_INTERVAL_US: u64 = 2_000;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 3;
const DEFAULT_PID_FILE: &str = "/var/run/capeflow.pid";

/// Tunables of the button event engine.
#[derive(Debug, Clone)]
pub struct ButtonConfig {
    pub pause_line: u32,
    pub mode_line: u32,
    /// Gap between the two debounce samples.
    pub debounce_interval: Duration,
    /// Bound on each edge wait; also the shutdown-flag check period.
    pub poll_timeout: Duration,
    /// Overall deadline for joining the watcher threads at shutdown.
    pub join_timeout: Duration,
    /// Elevate watcher threads to SCHED_FIFO (needs privileges; degrades
    /// with a warning without them).
    pub realtime: bool,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pause_line: DEFAULT_PAUSE_LINE,
            mode_line: DEFAULT_MODE_LINE,
            debounce_interval: Duration::from_micros(DEFAULT_DEBOUNCE_INTERVAL_US),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            realtime: true,
        }
    }
}

impl ButtonConfig {
    pub fn with_lines(mut self, pause_line: u32, mode_line: u32) -> Self {
        self.pause_line = pause_line;
        self.mode_line = mode_line;
        self
    }

    pub fn with_debounce_interval(mut self, interval: Duration) -> Self {
        self.debounce_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), BoardError> {
        if self.pause_line == self.mode_line {
            return Err(BoardError::InvalidArgument(format!(
                "pause and mode buttons share gpio line {}",
                self.pause_line
            )));
        }
        if self.debounce_interval.is_zero() {
            return Err(BoardError::InvalidArgument(
                "debounce interval must be non-zero".into(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(BoardError::InvalidArgument(
                "poll timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the whole board runtime.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    /// Path of the singleton PID file.
    pub pid_file: PathBuf,
    pub buttons: ButtonConfig,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            buttons: ButtonConfig::default(),
        }
    }
}

impl BoardConfig {
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = path.into();
        self
    }

    pub fn with_buttons(mut self, buttons: ButtonConfig) -> Self {
        self.buttons = buttons;
        self
    }
}
