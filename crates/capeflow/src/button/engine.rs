//! The four-slot watcher engine.
//!
//! One thread per (button, transition) pair blocks on its own edge
//! descriptor with a bounded timeout, debounces candidate edges with two
//! samples separated by the debounce interval, and on confirmation runs the
//! slot's callback before waking blocked waiters. Slots share nothing but
//! the shutdown flag and the per-button confirmed-state cells, so a slow
//! callback stalls only its own slot.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use capeflow_gpio::{Direction, EdgeMode, EdgeSource, EdgeWait, ValueDescriptor};
use tracing::{debug, warn};

use crate::button::{Button, ButtonCallback, ButtonState, NoopCallback, WaitOutcome};
use crate::config::ButtonConfig;
use crate::error::BoardError;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slot {
    button: Button,
    target: ButtonState,
    line: u32,
    /// Confirmation sequence; waiters block until it moves.
    seq: Mutex<u64>,
    cond: Condvar,
    callback: RwLock<Arc<dyn ButtonCallback>>,
}

impl Slot {
    fn new(button: Button, target: ButtonState, line: u32) -> Self {
        Self {
            button,
            target,
            line,
            seq: Mutex::new(0),
            cond: Condvar::new(),
            callback: RwLock::new(Arc::new(NoopCallback)),
        }
    }

    fn set_callback(&self, callback: Arc<dyn ButtonCallback>) {
        *self
            .callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn current_callback(&self) -> Arc<dyn ButtonCallback> {
        let guard = self.callback.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }
}

struct Shared {
    /// True between a successful `init` and the next `shutdown`.
    running: AtomicBool,
    shutdown: AtomicBool,
    /// Last confirmed state per button, seeded from the init snapshot.
    confirmed: [AtomicU8; 2],
    slots: [Slot; 4],
}

fn slot_index(button: Button, target: ButtonState) -> usize {
    button.index() * 2 + target as usize
}

/// Debounced watcher over the two board buttons.
pub struct ButtonEngine {
    gpio: Arc<dyn EdgeSource>,
    config: ButtonConfig,
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    pins_ready: AtomicBool,
}

impl ButtonEngine {
    /// Construct without touching hardware; call [`init`](Self::init) to
    /// set up the lines and start the watchers.
    pub fn new(gpio: Arc<dyn EdgeSource>, config: ButtonConfig) -> Self {
        let slots = [
            Slot::new(Button::Pause, ButtonState::Pressed, config.pause_line),
            Slot::new(Button::Pause, ButtonState::Released, config.pause_line),
            Slot::new(Button::Mode, ButtonState::Pressed, config.mode_line),
            Slot::new(Button::Mode, ButtonState::Released, config.mode_line),
        ];
        Self {
            gpio,
            config,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                confirmed: [
                    AtomicU8::new(ButtonState::Released as u8),
                    AtomicU8::new(ButtonState::Released as u8),
                ],
                slots,
            }),
            threads: Mutex::new(Vec::new()),
            pins_ready: AtomicBool::new(false),
        }
    }

    fn line_of(&self, button: Button) -> u32 {
        match button {
            Button::Pause => self.config.pause_line,
            Button::Mode => self.config.mode_line,
        }
    }

    /// Set up both lines, snapshot their levels, and start the four watcher
    /// threads. Any GPIO failure is fatal: no threads are left running.
    pub fn init(&self) -> Result<(), BoardError> {
        let mut threads = lock(&self.threads);
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(BoardError::AlreadyInitialized);
        }
        self.config.validate()?;

        let lines = [self.config.pause_line, self.config.mode_line];
        if !self.pins_ready.load(Ordering::SeqCst) {
            for line in lines {
                self.gpio.export(line)?;
                self.gpio.set_direction(line, Direction::In)?;
            }
            self.pins_ready.store(true, Ordering::SeqCst);
        }

        // Read the levels before edge detection is armed so the cache
        // starts from the buttons' actual resting state.
        for button in Button::ALL {
            let level = self.gpio.read_value(self.line_of(button))?;
            self.shared.confirmed[button.index()]
                .store(ButtonState::from_level(level) as u8, Ordering::SeqCst);
        }

        for line in lines {
            self.gpio.set_edge_mode(line, EdgeMode::Both)?;
        }

        for slot in &self.shared.slots {
            slot.set_callback(Arc::new(NoopCallback));
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);

        // Open every descriptor up front so a missing line fails startup
        // instead of leaving a half-dead engine.
        let mut descriptors: Vec<Box<dyn ValueDescriptor>> = Vec::with_capacity(4);
        for slot in &self.shared.slots {
            descriptors.push(self.gpio.open_value_descriptor(slot.line)?);
        }

        for (idx, fd) in descriptors.into_iter().enumerate() {
            let slot = &self.shared.slots[idx];
            let name = format!("btn-{}-{}", slot.button.name(), slot.target.name());
            let shared = Arc::clone(&self.shared);
            let debounce = self.config.debounce_interval;
            let poll_timeout = self.config.poll_timeout;
            let spawned = thread::Builder::new()
                .name(name)
                .spawn(move || watch(shared, idx, fd, debounce, poll_timeout));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    // Unwind the watchers that did start.
                    self.shared.shutdown.store(true, Ordering::SeqCst);
                    for handle in threads.drain(..) {
                        let _ = handle.join();
                    }
                    return Err(BoardError::ResourceUnavailable(format!(
                        "watcher thread: {err}"
                    )));
                }
            }
        }

        if self.config.realtime {
            elevate_watchers(&threads);
        }

        self.shared.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Replace the slot's callback. The engine must be running.
    pub fn register_callback(
        &self,
        button: Button,
        transition: ButtonState,
        callback: impl ButtonCallback + 'static,
    ) -> Result<(), BoardError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(BoardError::NotInitialized);
        }
        self.shared.slots[slot_index(button, transition)].set_callback(Arc::new(callback));
        Ok(())
    }

    /// Sample the button's pin right now, bypassing the debounced cache.
    pub fn state(&self, button: Button) -> Result<ButtonState, BoardError> {
        if !self.pins_ready.load(Ordering::SeqCst) {
            return Err(BoardError::NotInitialized);
        }
        let level = self.gpio.read_value(self.line_of(button))?;
        Ok(ButtonState::from_level(level))
    }

    /// The last debounce-confirmed state of the button.
    pub fn last_confirmed(&self, button: Button) -> Result<ButtonState, BoardError> {
        if !self.pins_ready.load(Ordering::SeqCst) {
            return Err(BoardError::NotInitialized);
        }
        Ok(ButtonState::from_u8(
            self.shared.confirmed[button.index()].load(Ordering::SeqCst),
        ))
    }

    /// Block until the transition is confirmed or shutdown begins.
    pub fn wait_for(&self, button: Button, transition: ButtonState) -> Result<WaitOutcome, BoardError> {
        if !self.shared.running.load(Ordering::SeqCst)
            || self.shared.shutdown.load(Ordering::SeqCst)
        {
            return Err(BoardError::NotInitialized);
        }
        let slot = &self.shared.slots[slot_index(button, transition)];
        let mut seq = lock(&slot.seq);
        let start = *seq;
        loop {
            if *seq != start {
                return Ok(WaitOutcome::Confirmed);
            }
            if self.shared.shutdown.load(Ordering::SeqCst) {
                return Ok(WaitOutcome::ShutdownRequested);
            }
            seq = slot
                .cond
                .wait(seq)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop the watchers: set the shutdown flag (observed within one poll
    /// timeout), wake every blocked waiter, and join the threads against
    /// the configured deadline. Idempotent; a second call returns
    /// immediately. A thread that misses the deadline is reported as a
    /// timeout but the engine still ends up not running.
    pub fn shutdown(&self) -> Result<(), BoardError> {
        let mut threads = lock(&self.threads);
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for slot in &self.shared.slots {
            let _seq = lock(&slot.seq);
            slot.cond.notify_all();
        }

        let deadline = Instant::now() + self.config.join_timeout;
        let mut timed_out = false;
        for handle in threads.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!(
                    thread = handle.thread().name().unwrap_or("btn-watcher"),
                    "button watcher did not stop before the join deadline"
                );
                timed_out = true;
            }
        }
        if timed_out {
            Err(BoardError::Timeout("button watcher join"))
        } else {
            Ok(())
        }
    }
}

impl Drop for ButtonEngine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn watch(
    shared: Arc<Shared>,
    idx: usize,
    mut fd: Box<dyn ValueDescriptor>,
    debounce: Duration,
    poll_timeout: Duration,
) {
    let slot = &shared.slots[idx];
    while !shared.shutdown.load(Ordering::Acquire) {
        match fd.wait_edge(poll_timeout) {
            Ok(EdgeWait::TimedOut) => continue,
            Ok(EdgeWait::Ready) => {}
            Err(err) => {
                warn!(
                    button = slot.button.name(),
                    transition = slot.target.name(),
                    %err,
                    "gpio edge wait failed, watcher exiting"
                );
                return;
            }
        }

        // Candidate edge: first sample, consuming the buffered read.
        let first = match fd.read_level() {
            Ok(level) => level,
            Err(err) => {
                warn!(
                    button = slot.button.name(),
                    transition = slot.target.name(),
                    %err,
                    "gpio read failed, watcher exiting"
                );
                return;
            }
        };
        if ButtonState::from_level(first) != slot.target {
            continue;
        }

        // Second sample after the debounce interval; bounce edges buffered
        // meanwhile are drained so they cannot satisfy the next wait.
        thread::sleep(debounce);
        if let Err(err) = fd.drain() {
            warn!(
                button = slot.button.name(),
                transition = slot.target.name(),
                %err,
                "gpio drain failed, watcher exiting"
            );
            return;
        }
        let second = match fd.read_level() {
            Ok(level) => level,
            Err(err) => {
                warn!(
                    button = slot.button.name(),
                    transition = slot.target.name(),
                    %err,
                    "gpio read failed, watcher exiting"
                );
                return;
            }
        };
        if ButtonState::from_level(second) != slot.target {
            debug!(
                button = slot.button.name(),
                transition = slot.target.name(),
                "bounce rejected"
            );
            continue;
        }

        // Confirmed. Run the callback first, outside any lock, so a blocked
        // wait_for never returns before the callback has completed.
        shared.confirmed[slot.button.index()].store(slot.target as u8, Ordering::SeqCst);
        let callback = slot.current_callback();
        callback.on_event(slot.button, slot.target);
        {
            let mut seq = lock(&slot.seq);
            *seq += 1;
            slot.cond.notify_all();
        }
        debug!(
            button = slot.button.name(),
            transition = slot.target.name(),
            "transition confirmed"
        );
    }
}

/// Best-effort SCHED_FIFO elevation, a notch under the platform maximum so
/// kernel housekeeping threads still win. Needs privileges; without them
/// the watchers stay at normal priority.
#[cfg(unix)]
fn elevate_watchers(threads: &[JoinHandle<()>]) {
    use std::os::unix::thread::JoinHandleExt;

    // SAFETY: querying the priority range has no side effects.
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if max < 0 {
        warn!("could not query SCHED_FIFO priority range");
        return;
    }
    let param = libc::sched_param {
        sched_priority: max - 5,
    };
    let mut warned = false;
    for handle in threads {
        // SAFETY: the pthread handle stays valid while the JoinHandle lives.
        let rc = unsafe {
            libc::pthread_setschedparam(handle.as_pthread_t(), libc::SCHED_FIFO, &param)
        };
        if rc != 0 && !warned {
            let err = io::Error::from_raw_os_error(rc);
            warn!(%err, "could not elevate button watchers to realtime priority");
            warned = true;
        }
    }
}

#[cfg(not(unix))]
fn elevate_watchers(_threads: &[JoinHandle<()>]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_index_covers_all_pairs() {
        let mut seen = [false; 4];
        for button in Button::ALL {
            for target in ButtonState::ALL {
                seen[slot_index(button, target)] = true;
            }
        }
        assert!(seen.iter().all(|&hit| hit));
    }

    #[test]
    fn test_slot_index_matches_slot_layout() {
        let engine = ButtonEngine::new(
            Arc::new(capeflow_gpio::MockGpio::new()),
            ButtonConfig::default(),
        );
        for button in Button::ALL {
            for target in ButtonState::ALL {
                let slot = &engine.shared.slots[slot_index(button, target)];
                assert_eq!(slot.button, button);
                assert_eq!(slot.target, target);
            }
        }
    }
}
