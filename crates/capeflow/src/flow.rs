//! Process-wide flow state.
//!
//! A single status cell coordinates the starting and stopping of every
//! thread in the process: application loops keep running while the state is
//! `Running` or `Paused` and wind down once it becomes `Exiting`. The cell
//! is a relaxed atomic: it is read far more often than written and a
//! staleness of one scheduling quantum is acceptable, so no lock is used.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// High-level phase of the process life cycle.
///
/// `Exiting` is terminal in practice: nothing in the runtime transitions
/// out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Uninitialized = 0,
    Running = 1,
    Paused = 2,
    Exiting = 3,
}

impl ProcessState {
    /// Diagnostic name of the state.
    pub fn describe(self) -> &'static str {
        match self {
            ProcessState::Uninitialized => "UNINITIALIZED",
            ProcessState::Running => "RUNNING",
            ProcessState::Paused => "PAUSED",
            ProcessState::Exiting => "EXITING",
        }
    }

    fn from_u8(raw: u8) -> ProcessState {
        match raw {
            1 => ProcessState::Running,
            2 => ProcessState::Paused,
            3 => ProcessState::Exiting,
            _ => ProcessState::Uninitialized,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Cloneable handle to the process-wide status cell.
///
/// Clones share the same cell. The handle is passed explicitly into each
/// collaborator rather than living in a hidden global, so the state machine
/// stays testable in isolation.
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    cell: Arc<AtomicU8>,
}

impl FlowState {
    /// A fresh cell in the `Uninitialized` state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ProcessState {
        ProcessState::from_u8(self.cell.load(Ordering::Relaxed))
    }

    /// Unconditional overwrite; no transition validation.
    pub fn set(&self, state: ProcessState) {
        self.cell.store(state as u8, Ordering::Relaxed);
    }

    pub fn is_exiting(&self) -> bool {
        self.get() == ProcessState::Exiting
    }

    /// The raw cell, for the one consumer that must reach it from signal
    /// context without touching the handle.
    pub(crate) fn shared_cell(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_uninitialized() {
        let flow = FlowState::new();
        assert_eq!(flow.get(), ProcessState::Uninitialized);
        assert!(!flow.is_exiting());
    }

    #[test]
    fn test_set_overwrites_unconditionally() {
        let flow = FlowState::new();
        flow.set(ProcessState::Exiting);
        flow.set(ProcessState::Running);
        assert_eq!(flow.get(), ProcessState::Running);
    }

    #[test]
    fn test_clones_share_the_cell() {
        let flow = FlowState::new();
        let other = flow.clone();
        other.set(ProcessState::Exiting);
        assert!(flow.is_exiting());
    }

    #[test]
    fn test_describe_names() {
        assert_eq!(ProcessState::Uninitialized.describe(), "UNINITIALIZED");
        assert_eq!(ProcessState::Running.describe(), "RUNNING");
        assert_eq!(ProcessState::Paused.describe(), "PAUSED");
        assert_eq!(ProcessState::Exiting.describe(), "EXITING");
    }

    #[test]
    fn test_display_matches_describe() {
        assert_eq!(ProcessState::Paused.to_string(), "PAUSED");
    }

    #[test]
    fn test_visible_across_threads() {
        let flow = FlowState::new();
        let writer = flow.clone();
        let handle = std::thread::spawn(move || writer.set(ProcessState::Exiting));
        handle.join().unwrap();
        assert!(flow.is_exiting());
    }
}
