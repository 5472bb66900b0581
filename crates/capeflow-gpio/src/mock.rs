//! Mock edge source for tests and host-side development.
//!
//! `MockGpio` implements [`EdgeSource`] with scripted levels instead of
//! hardware. Each call to [`MockGpio::set_level`] that changes a line's
//! level queues one edge notification to every open descriptor on that
//! line, which is what a both-edges line delivers.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{Direction, EdgeMode, EdgeSource, EdgeWait, GpioError, Level, Result, ValueDescriptor};

#[derive(Debug)]
struct MockLine {
    exported: bool,
    direction: Option<Direction>,
    edge_mode: EdgeMode,
    level: Level,
    taps: Vec<Sender<()>>,
}

impl MockLine {
    fn new() -> Self {
        Self {
            exported: false,
            direction: None,
            edge_mode: EdgeMode::None,
            // Buttons idle high on the reference board, so new lines do too.
            level: Level::High,
            taps: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    lines: Mutex<HashMap<u32, MockLine>>,
    fail_exports: AtomicBool,
}

impl Shared {
    fn lines(&self) -> MutexGuard<'_, HashMap<u32, MockLine>> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Scripted [`EdgeSource`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    shared: Arc<Shared>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `export` call fail, for exercising fatal
    /// initialization paths.
    pub fn fail_exports(&self, fail: bool) {
        self.shared.fail_exports.store(fail, Ordering::SeqCst);
    }

    /// Drive the line to `level`. A change queues one edge notification to
    /// every open descriptor on the line; setting the same level is a no-op.
    pub fn set_level(&self, line: u32, level: Level) {
        let mut lines = self.shared.lines();
        let entry = lines.entry(line).or_insert_with(MockLine::new);
        if entry.level == level {
            return;
        }
        entry.level = level;
        entry.taps.retain(|tap| tap.send(()).is_ok());
    }

    /// Current scripted level of the line, defaulting to high.
    pub fn level(&self, line: u32) -> Level {
        self.shared
            .lines()
            .get(&line)
            .map(|entry| entry.level)
            .unwrap_or(Level::High)
    }

    /// Configured edge mode of the line, for asserting setup calls.
    pub fn edge_mode(&self, line: u32) -> EdgeMode {
        self.shared
            .lines()
            .get(&line)
            .map(|entry| entry.edge_mode)
            .unwrap_or(EdgeMode::None)
    }

    /// Configured direction of the line, if any.
    pub fn direction(&self, line: u32) -> Option<Direction> {
        self.shared.lines().get(&line).and_then(|entry| entry.direction)
    }

    pub fn is_exported(&self, line: u32) -> bool {
        self.shared
            .lines()
            .get(&line)
            .map(|entry| entry.exported)
            .unwrap_or(false)
    }
}

impl EdgeSource for MockGpio {
    fn export(&self, line: u32) -> Result<()> {
        if self.shared.fail_exports.load(Ordering::SeqCst) {
            return Err(GpioError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "export rejected by mock",
            )));
        }
        self.shared
            .lines()
            .entry(line)
            .or_insert_with(MockLine::new)
            .exported = true;
        Ok(())
    }

    fn set_direction(&self, line: u32, direction: Direction) -> Result<()> {
        let mut lines = self.shared.lines();
        let entry = lines.get_mut(&line).ok_or(GpioError::NotExported(line))?;
        entry.direction = Some(direction);
        Ok(())
    }

    fn set_edge_mode(&self, line: u32, mode: EdgeMode) -> Result<()> {
        let mut lines = self.shared.lines();
        let entry = lines.get_mut(&line).ok_or(GpioError::NotExported(line))?;
        entry.edge_mode = mode;
        Ok(())
    }

    fn open_value_descriptor(&self, line: u32) -> Result<Box<dyn ValueDescriptor>> {
        let mut lines = self.shared.lines();
        let entry = lines.get_mut(&line).ok_or(GpioError::NotExported(line))?;
        if !entry.exported {
            return Err(GpioError::NotExported(line));
        }
        let (tx, rx) = mpsc::channel();
        entry.taps.push(tx);
        Ok(Box::new(MockDescriptor {
            line,
            shared: Arc::clone(&self.shared),
            edges: rx,
        }))
    }

    fn read_value(&self, line: u32) -> Result<Level> {
        let lines = self.shared.lines();
        let entry = lines.get(&line).ok_or(GpioError::NotExported(line))?;
        if !entry.exported {
            return Err(GpioError::NotExported(line));
        }
        Ok(entry.level)
    }
}

struct MockDescriptor {
    line: u32,
    shared: Arc<Shared>,
    edges: Receiver<()>,
}

impl ValueDescriptor for MockDescriptor {
    fn wait_edge(&mut self, timeout: Duration) -> Result<EdgeWait> {
        match self.edges.recv_timeout(timeout) {
            Ok(()) => Ok(EdgeWait::Ready),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Ok(EdgeWait::TimedOut)
            }
        }
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            match self.edges.try_recv() {
                Ok(()) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn read_level(&mut self) -> Result<Level> {
        self.shared
            .lines()
            .get(&self.line)
            .map(|entry| entry.level)
            .ok_or(GpioError::NotExported(self.line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_is_idempotent() {
        let gpio = MockGpio::new();
        gpio.export(69).unwrap();
        gpio.export(69).unwrap();
        assert!(gpio.is_exported(69));
    }

    #[test]
    fn test_read_unexported_line_fails() {
        let gpio = MockGpio::new();
        assert!(matches!(gpio.read_value(12), Err(GpioError::NotExported(12))));
    }

    #[test]
    fn test_level_change_wakes_descriptor() {
        let gpio = MockGpio::new();
        gpio.export(69).unwrap();
        let mut fd = gpio.open_value_descriptor(69).unwrap();

        gpio.set_level(69, Level::Low);
        assert_eq!(
            fd.wait_edge(Duration::from_millis(50)).unwrap(),
            EdgeWait::Ready
        );
        assert_eq!(fd.read_level().unwrap(), Level::Low);
    }

    #[test]
    fn test_unchanged_level_is_not_an_edge() {
        let gpio = MockGpio::new();
        gpio.export(69).unwrap();
        let mut fd = gpio.open_value_descriptor(69).unwrap();

        gpio.set_level(69, Level::High); // already high
        assert_eq!(
            fd.wait_edge(Duration::from_millis(10)).unwrap(),
            EdgeWait::TimedOut
        );
    }

    #[test]
    fn test_drain_discards_buffered_edges() {
        let gpio = MockGpio::new();
        gpio.export(69).unwrap();
        let mut fd = gpio.open_value_descriptor(69).unwrap();

        gpio.set_level(69, Level::Low);
        gpio.set_level(69, Level::High);
        fd.drain().unwrap();
        assert_eq!(
            fd.wait_edge(Duration::from_millis(10)).unwrap(),
            EdgeWait::TimedOut
        );
    }

    #[test]
    fn test_every_descriptor_on_a_line_sees_the_edge() {
        let gpio = MockGpio::new();
        gpio.export(68).unwrap();
        let mut a = gpio.open_value_descriptor(68).unwrap();
        let mut b = gpio.open_value_descriptor(68).unwrap();

        gpio.set_level(68, Level::Low);
        assert_eq!(a.wait_edge(Duration::from_millis(50)).unwrap(), EdgeWait::Ready);
        assert_eq!(b.wait_edge(Duration::from_millis(50)).unwrap(), EdgeWait::Ready);
    }

    #[test]
    fn test_failed_export_reports_io_error() {
        let gpio = MockGpio::new();
        gpio.fail_exports(true);
        assert!(matches!(gpio.export(69), Err(GpioError::Io(_))));
    }
}
