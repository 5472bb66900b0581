//! PID-file singleton guard.
//!
//! Ensures only one process controls the hardware at a time. The lock is a
//! plain PID file: best-effort mutual exclusion, not kernel-enforced, which
//! is an accepted limitation since the holder is normally a long-lived
//! service started once. A second instance takes the lock over by asking
//! the prior holder to terminate, escalating to a forceful kill only after
//! a grace window.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::BoardError;

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_KILL_SETTLE: Duration = Duration::from_millis(500);

/// How the lock was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    /// No prior holder existed (or it was already dead).
    NoExistingInstance,
    /// A live prior holder exited inside the grace window after SIGTERM.
    PriorInstanceExitedCleanly,
    /// A live prior holder ignored SIGTERM and was killed.
    PriorInstanceForceKilled,
    /// The lock file held no usable PID and was discarded.
    LockCorrupt,
}

/// What a lock file's contents turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockContents {
    Corrupt,
    Pid(i32),
}

/// Interpret lock-file contents. Anything but a positive decimal PID is
/// corrupt, including an empty file and the PID 0, which `kill(2)` would
/// aim at the whole process group.
pub(crate) fn classify_contents(contents: &str) -> LockContents {
    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => LockContents::Pid(pid),
        _ => LockContents::Corrupt,
    }
}

fn process_group_alive(pid: i32) -> bool {
    // SAFETY: getpgid is safe to call with any pid value; a dead or invalid
    // pid reports -1/ESRCH.
    unsafe { libc::getpgid(pid) >= 0 }
}

fn send_signal(pid: i32, signal: libc::c_int) {
    // SAFETY: pid is a positive foreign process id read from the lock file;
    // delivery failure (already exited) is fine to ignore.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        warn!(pid, signal, "failed to signal prior instance");
    }
}

/// PID-file lock at a fixed path.
#[derive(Debug, Clone)]
pub struct SingletonGuard {
    path: PathBuf,
    grace_period: Duration,
    poll_interval: Duration,
    kill_settle: Duration,
}

impl SingletonGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            kill_settle: DEFAULT_KILL_SETTLE,
        }
    }

    /// Shrink the takeover windows, mainly for tests.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_kill_settle(mut self, settle: Duration) -> Self {
        self.kill_settle = settle;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, evicting a prior holder if necessary. On every `Ok`
    /// outcome the file ends up holding the caller's PID.
    pub fn acquire(&self) -> Result<Acquisition, BoardError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.write_own_pid()?;
                return Ok(Acquisition::NoExistingInstance);
            }
            Err(err) => return Err(err.into()),
        };

        let prior = match classify_contents(&contents) {
            LockContents::Corrupt => {
                warn!(path = %self.path.display(), "discarding corrupt lock file");
                self.remove_lock_file()?;
                self.write_own_pid()?;
                return Ok(Acquisition::LockCorrupt);
            }
            LockContents::Pid(pid) => pid,
        };

        if prior == process::id() as i32 {
            // Already ours; refresh and carry on.
            self.write_own_pid()?;
            return Ok(Acquisition::NoExistingInstance);
        }

        if !process_group_alive(prior) {
            info!(pid = prior, "removing stale lock of a dead instance");
            self.remove_lock_file()?;
            self.write_own_pid()?;
            return Ok(Acquisition::NoExistingInstance);
        }

        info!(pid = prior, "asking prior instance to terminate");
        send_signal(prior, libc::SIGTERM);

        let deadline = Instant::now() + self.grace_period;
        while Instant::now() < deadline {
            if !process_group_alive(prior) {
                self.remove_lock_file()?;
                self.write_own_pid()?;
                return Ok(Acquisition::PriorInstanceExitedCleanly);
            }
            thread::sleep(self.poll_interval);
        }

        warn!(pid = prior, "prior instance ignored SIGTERM, killing it");
        send_signal(prior, libc::SIGKILL);
        thread::sleep(self.kill_settle);
        self.remove_lock_file()?;
        self.write_own_pid()?;
        Ok(Acquisition::PriorInstanceForceKilled)
    }

    /// Remove the lock file if present. Idempotent; never fails.
    pub fn release(&self) {
        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn write_own_pid(&self) -> Result<(), BoardError> {
        fs::write(&self.path, format!("{}\n", process::id()))?;
        Ok(())
    }

    fn remove_lock_file(&self) -> Result<(), BoardError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BoardError::LockCorrupt(format!(
                "{}: {}",
                self.path.display(),
                err
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn temp_guard() -> (TempDir, SingletonGuard) {
        let dir = TempDir::new().unwrap();
        let guard = SingletonGuard::new(dir.path().join("capeflow.pid"));
        (dir, guard)
    }

    fn read_pid(guard: &SingletonGuard) -> u32 {
        fs::read_to_string(guard.path())
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_acquire_with_no_lock_file() {
        let (_dir, guard) = temp_guard();
        let outcome = guard.acquire().unwrap();
        assert_eq!(outcome, Acquisition::NoExistingInstance);
        assert_eq!(read_pid(&guard), process::id());
    }

    #[test]
    fn test_acquire_with_corrupt_lock_file() {
        let (_dir, guard) = temp_guard();
        fs::write(guard.path(), "not a pid").unwrap();
        let outcome = guard.acquire().unwrap();
        assert_eq!(outcome, Acquisition::LockCorrupt);
        assert_eq!(read_pid(&guard), process::id());
    }

    #[test]
    fn test_acquire_with_empty_lock_file() {
        let (_dir, guard) = temp_guard();
        fs::write(guard.path(), "").unwrap();
        assert_eq!(guard.acquire().unwrap(), Acquisition::LockCorrupt);
    }

    #[test]
    fn test_acquire_when_already_owned() {
        let (_dir, guard) = temp_guard();
        fs::write(guard.path(), process::id().to_string()).unwrap();
        let outcome = guard.acquire().unwrap();
        assert_eq!(outcome, Acquisition::NoExistingInstance);
        assert_eq!(read_pid(&guard), process::id());
    }

    #[test]
    fn test_acquire_with_stale_dead_pid() {
        let (_dir, guard) = temp_guard();
        // A reaped child is guaranteed dead and its pid safe to probe.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        fs::write(guard.path(), dead_pid.to_string()).unwrap();

        let outcome = guard.acquire().unwrap();
        assert_eq!(outcome, Acquisition::NoExistingInstance);
        assert_eq!(read_pid(&guard), process::id());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (_dir, guard) = temp_guard();
        guard.acquire().unwrap();
        guard.release();
        assert!(!guard.path().exists());
        guard.release(); // nothing to delete, still fine
    }

    #[test]
    fn test_classify_positive_pid() {
        assert_eq!(classify_contents("1234\n"), LockContents::Pid(1234));
        assert_eq!(classify_contents("  42  "), LockContents::Pid(42));
    }

    #[test]
    fn test_classify_rejects_zero_and_negative() {
        assert_eq!(classify_contents("0"), LockContents::Corrupt);
        assert_eq!(classify_contents("-5"), LockContents::Corrupt);
    }

    proptest! {
        #[test]
        fn test_classify_never_panics(contents in ".{0,64}") {
            let _ = classify_contents(&contents);
        }

        #[test]
        fn test_classify_non_numeric_is_corrupt(contents in "[a-zA-Z !@#%]{1,32}") {
            prop_assert_eq!(classify_contents(&contents), LockContents::Corrupt);
        }
    }
}
