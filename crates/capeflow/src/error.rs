//! Runtime errors.

use capeflow_gpio::GpioError;
use thiserror::Error;

/// Errors reported by the capeflow runtime.
#[derive(Error, Debug)]
pub enum BoardError {
    /// A GPIO line or file could not be opened or accessed.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("not initialized")]
    NotInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// The singleton lock file exists but cannot be interpreted or removed.
    #[error("lock file corrupt: {0}")]
    LockCorrupt(String),
}

impl From<GpioError> for BoardError {
    fn from(err: GpioError) -> Self {
        BoardError::ResourceUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for BoardError {
    fn from(err: std::io::Error) -> Self {
        BoardError::ResourceUnavailable(err.to_string())
    }
}
