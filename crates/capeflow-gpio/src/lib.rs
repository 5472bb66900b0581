//! GPIO edge-source contract consumed by the capeflow runtime.
//!
//! The runtime never talks to sysfs or registers directly; it consumes this
//! small primitive surface and a board driver crate implements it. The
//! [`MockGpio`] implementation in [`mock`] covers host-side tests and
//! development without hardware.

#![deny(clippy::all)]

use std::io;
use std::time::Duration;

use thiserror::Error;

pub mod mock;

pub use mock::MockGpio;

/// Errors surfaced by an edge source or a value descriptor.
#[derive(Error, Debug)]
pub enum GpioError {
    #[error("gpio i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("gpio line {0} is not exported")]
    NotExported(u32),
}

pub type Result<T> = std::result::Result<T, GpioError>;

/// Configured direction of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Edge-detection mode of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    None,
    Rising,
    Falling,
    Both,
}

/// Electrical level of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Outcome of a bounded edge wait on a value descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeWait {
    /// An edge fired since the descriptor was last read or drained.
    Ready,
    /// The timeout elapsed with no edge activity.
    TimedOut,
}

/// A board GPIO driver, viewed through the primitives the runtime needs.
///
/// Implementations are expected to make `export` idempotent: exporting an
/// already-exported line succeeds.
pub trait EdgeSource: Send + Sync {
    fn export(&self, line: u32) -> Result<()>;

    fn set_direction(&self, line: u32, direction: Direction) -> Result<()>;

    fn set_edge_mode(&self, line: u32, mode: EdgeMode) -> Result<()>;

    /// Open a pollable handle onto the line's value.
    ///
    /// The line must be exported and configured for edge detection before
    /// the handle reports edges.
    fn open_value_descriptor(&self, line: u32) -> Result<Box<dyn ValueDescriptor>>;

    /// Sample the line synchronously, outside any descriptor.
    fn read_value(&self, line: u32) -> Result<Level>;
}

/// A pollable handle onto one line's value. Closed on drop.
pub trait ValueDescriptor: Send {
    /// Block until an edge fires or the timeout elapses.
    fn wait_edge(&mut self, timeout: Duration) -> Result<EdgeWait>;

    /// Consume any buffered edge notifications so a stale edge does not
    /// satisfy the next wait.
    fn drain(&mut self) -> Result<()>;

    /// Sample the current level through this descriptor.
    fn read_level(&mut self) -> Result<Level>;
}
