#![deny(clippy::all)]

mod button;
mod config;
mod error;
mod flow;
mod runtime;
mod signals;
mod singleton;

pub use button::Button;
pub use button::ButtonCallback;
pub use button::ButtonEngine;
pub use button::ButtonState;
pub use button::WaitOutcome;
pub use config::BoardConfig;
pub use config::ButtonConfig;
pub use config::DEFAULT_MODE_LINE;
pub use config::DEFAULT_PAUSE_LINE;
pub use error::BoardError;
pub use flow::FlowState;
pub use flow::ProcessState;
pub use runtime::Board;
pub use signals::last_fault;
pub use signals::FaultInfo;
pub use signals::FaultKind;
pub use signals::SignalShutdown;
pub use singleton::Acquisition;
pub use singleton::SingletonGuard;

pub type Result<T> = std::result::Result<T, BoardError>;
