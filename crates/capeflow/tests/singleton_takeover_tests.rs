//! Takeover scenarios that need real foreign processes.

use std::fs;
use std::process::Command;
use std::thread;
use std::time::Duration;

use capeflow::{Acquisition, SingletonGuard};
use tempfile::TempDir;

fn read_pid(guard: &SingletonGuard) -> u32 {
    fs::read_to_string(guard.path())
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

#[test]
fn test_live_holder_exits_cleanly_within_grace() {
    let dir = TempDir::new().unwrap();
    let guard = SingletonGuard::new(dir.path().join("capeflow.pid"));

    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let holder_pid = child.id();
    fs::write(guard.path(), holder_pid.to_string()).unwrap();

    // Reap as soon as the holder dies so its pid actually disappears.
    let reaper = thread::spawn(move || {
        let _ = child.wait();
    });

    let outcome = guard.acquire().unwrap();
    assert_eq!(outcome, Acquisition::PriorInstanceExitedCleanly);
    assert_eq!(read_pid(&guard), std::process::id());

    reaper.join().unwrap();
    guard.release();
}

#[test]
fn test_holder_ignoring_sigterm_is_force_killed() {
    let dir = TempDir::new().unwrap();
    let guard = SingletonGuard::new(dir.path().join("capeflow.pid"))
        .with_grace_period(Duration::from_millis(400))
        .with_poll_interval(Duration::from_millis(50))
        .with_kill_settle(Duration::from_millis(100));

    let mut child = Command::new("sh")
        .arg("-c")
        .arg("trap '' TERM; sleep 5")
        .spawn()
        .unwrap();
    let holder_pid = child.id();
    fs::write(guard.path(), holder_pid.to_string()).unwrap();

    let reaper = thread::spawn(move || {
        let _ = child.wait();
    });

    let outcome = guard.acquire().unwrap();
    assert_eq!(outcome, Acquisition::PriorInstanceForceKilled);
    assert_eq!(read_pid(&guard), std::process::id());

    reaper.join().unwrap();
    guard.release();
}
