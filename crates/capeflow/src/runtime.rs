//! Board bring-up and shut-down.
//!
//! Ties the pieces together in the order a program needs them: take the
//! singleton lock, arm signal-driven shutdown, start the button engine,
//! then hand control to the application with the flow state at `Paused`.

use std::sync::Arc;

use capeflow_gpio::EdgeSource;
use tracing::info;

use crate::button::ButtonEngine;
use crate::config::BoardConfig;
use crate::error::BoardError;
use crate::flow::{FlowState, ProcessState};
use crate::signals::SignalShutdown;
use crate::singleton::{Acquisition, SingletonGuard};

/// A fully brought-up board runtime.
pub struct Board {
    flow: FlowState,
    buttons: ButtonEngine,
    signals: Option<SignalShutdown>,
    singleton: SingletonGuard,
    acquisition: Acquisition,
}

impl Board {
    /// Bring the runtime up. A failure at any stage unwinds the stages
    /// already completed before returning the error.
    pub fn bring_up(gpio: Arc<dyn EdgeSource>, config: BoardConfig) -> Result<Self, BoardError> {
        let flow = FlowState::new();

        let singleton = SingletonGuard::new(&config.pid_file);
        let acquisition = singleton.acquire()?;
        info!(?acquisition, "singleton lock acquired");

        let signals = match SignalShutdown::enable(&flow) {
            Ok(signals) => signals,
            Err(err) => {
                singleton.release();
                return Err(err);
            }
        };

        let buttons = ButtonEngine::new(gpio, config.buttons);
        if let Err(err) = buttons.init() {
            let _ = signals.disable();
            singleton.release();
            return Err(err);
        }

        flow.set(ProcessState::Paused);
        Ok(Self {
            flow,
            buttons,
            signals: Some(signals),
            singleton,
            acquisition,
        })
    }

    pub fn flow(&self) -> &FlowState {
        &self.flow
    }

    pub fn buttons(&self) -> &ButtonEngine {
        &self.buttons
    }

    /// How the singleton lock was obtained at bring-up.
    pub fn acquisition(&self) -> Acquisition {
        self.acquisition
    }

    /// Tear everything down: flow state to `Exiting`, stop the watchers,
    /// restore signal handling, release the lock. The lock is released
    /// even when an earlier stage reports an error.
    pub fn shut_down(mut self) -> Result<(), BoardError> {
        self.flow.set(ProcessState::Exiting);
        let buttons_result = self.buttons.shutdown();
        let signals_result = match self.signals.take() {
            Some(signals) => signals.disable(),
            None => Ok(()),
        };
        self.singleton.release();
        buttons_result.and(signals_result)
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        // Best-effort teardown for the no-shut_down path; everything here
        // is idempotent.
        self.flow.set(ProcessState::Exiting);
        let _ = self.buttons.shutdown();
        self.singleton.release();
    }
}
