//! In-process signal delivery driving the flow state.
//!
//! Kept to a single test: it owns the process-wide signal dispositions for
//! its whole run.

use std::thread;
use std::time::{Duration, Instant};

use capeflow::{FlowState, ProcessState, SignalShutdown};

#[test]
fn test_signals_drive_flow_state() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let flow = FlowState::new();
    flow.set(ProcessState::Running);
    let signals = SignalShutdown::enable(&flow).unwrap();

    // Hang-up is ignored: the process carries on.
    // SAFETY: raising a signal we installed a handler for.
    unsafe { libc::raise(libc::SIGHUP) };
    thread::sleep(Duration::from_millis(200));
    assert_eq!(flow.get(), ProcessState::Running);

    // Terminate flips the flow state to EXITING.
    // SAFETY: as above.
    unsafe { libc::raise(libc::SIGTERM) };
    let deadline = Instant::now() + Duration::from_secs(2);
    while !flow.is_exiting() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(flow.is_exiting());

    // A second delivery is harmless (idempotent).
    // SAFETY: as above.
    unsafe { libc::raise(libc::SIGTERM) };
    thread::sleep(Duration::from_millis(100));
    assert!(flow.is_exiting());

    // No fault fired during any of this.
    assert_eq!(capeflow::last_fault(), None);

    signals.disable().unwrap();
}
