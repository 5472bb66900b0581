//! Debounced button events.
//!
//! Two physical buttons, two transitions each: every (button, transition)
//! pair gets its own watcher slot inside the [`ButtonEngine`], with a
//! replaceable callback and a blocking wait. Buttons are wired active-low:
//! a low line level means pressed.

use capeflow_gpio::Level;

mod engine;

pub use engine::ButtonEngine;

/// The two user buttons on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Pause,
    Mode,
}

impl Button {
    pub(crate) const ALL: [Button; 2] = [Button::Pause, Button::Mode];

    pub(crate) fn index(self) -> usize {
        match self {
            Button::Pause => 0,
            Button::Mode => 1,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Button::Pause => "pause",
            Button::Mode => "mode",
        }
    }
}

/// A button's debounced state; also names the transition a watcher slot
/// targets (the transition *into* this state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ButtonState {
    Pressed = 0,
    Released = 1,
}

impl ButtonState {
    pub(crate) const ALL: [ButtonState; 2] = [ButtonState::Pressed, ButtonState::Released];

    pub(crate) fn from_level(level: Level) -> ButtonState {
        match level {
            Level::Low => ButtonState::Pressed,
            Level::High => ButtonState::Released,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> ButtonState {
        if raw == ButtonState::Pressed as u8 {
            ButtonState::Pressed
        } else {
            ButtonState::Released
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            ButtonState::Pressed => "pressed",
            ButtonState::Released => "released",
        }
    }
}

/// Why a blocking wait returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watched transition was confirmed.
    Confirmed,
    /// The engine began shutting down while the wait was outstanding.
    ShutdownRequested,
}

/// A button event handler, invoked on the owning watcher thread.
///
/// Every slot always has one; [`register_callback`](ButtonEngine::register_callback)
/// replaces the default no-op.
pub trait ButtonCallback: Send + Sync {
    fn on_event(&self, button: Button, state: ButtonState);
}

impl<F> ButtonCallback for F
where
    F: Fn(Button, ButtonState) + Send + Sync,
{
    fn on_event(&self, button: Button, state: ButtonState) {
        self(button, state)
    }
}

/// Default callback that does nothing.
pub(crate) struct NoopCallback;

impl ButtonCallback for NoopCallback {
    fn on_event(&self, _button: Button, _state: ButtonState) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_low_mapping() {
        assert_eq!(ButtonState::from_level(Level::Low), ButtonState::Pressed);
        assert_eq!(ButtonState::from_level(Level::High), ButtonState::Released);
    }

    #[test]
    fn test_state_round_trips_through_u8() {
        for state in ButtonState::ALL {
            assert_eq!(ButtonState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_closures_are_callbacks() {
        let cb = |_: Button, _: ButtonState| {};
        cb.on_event(Button::Pause, ButtonState::Pressed);
    }
}
