//! Signal-driven shutdown.
//!
//! SIGINT and SIGTERM set the flow state to `Exiting` so every thread can
//! wind down cleanly; SIGHUP is ignored so losing a remote session does not
//! kill the process. Both are serviced by a named watcher thread, keeping
//! logging out of signal context. SIGSEGV is caught exactly once through a
//! raw `sigaction` handler that records the fault, best-effort flips the
//! flow state, and writes one pre-formatted line to stderr using nothing
//! but `write(2)`.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use libc::c_int;
use signal_hook::consts::{SIGHUP, SIGINT, SIGSEGV, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{debug, info, warn};

use crate::error::BoardError;
use crate::flow::{FlowState, ProcessState};

// POSIX `si_code` values for SIGSEGV. libc 0.2.189 only re-exports these on
// hurd/aix, not on Linux, so define the standard Linux ABI values here.
const SEGV_MAPERR: c_int = 1;
const SEGV_ACCERR: c_int = 2;

// Fault record filled in by the SIGSEGV handler and read afterwards by
// supervisory code. The flow cell is reached through a leaked Arc clone so
// the handler touches nothing that can be deallocated under it.
static FAULT_SEEN: AtomicBool = AtomicBool::new(false);
static FAULT_ADDR: AtomicUsize = AtomicUsize::new(0);
static FAULT_CODE: AtomicI32 = AtomicI32::new(0);
static FLOW_CELL: AtomicPtr<AtomicU8> = AtomicPtr::new(ptr::null_mut());

/// Coarse classification of a segmentation fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    AddressNotMapped,
    AccessNotPermitted,
    Unknown,
}

impl FaultKind {
    fn classify(si_code: i32) -> FaultKind {
        match si_code {
            SEGV_MAPERR => FaultKind::AddressNotMapped,
            SEGV_ACCERR => FaultKind::AccessNotPermitted,
            _ => FaultKind::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            FaultKind::AddressNotMapped => "address not mapped",
            FaultKind::AccessNotPermitted => "access not permitted",
            FaultKind::Unknown => "unknown reason",
        }
    }
}

/// A segmentation fault recorded by the one-shot handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultInfo {
    pub address: usize,
    pub kind: FaultKind,
}

/// The fault caught by the SIGSEGV handler, if one has fired.
pub fn last_fault() -> Option<FaultInfo> {
    if !FAULT_SEEN.load(Ordering::SeqCst) {
        return None;
    }
    Some(FaultInfo {
        address: FAULT_ADDR.load(Ordering::SeqCst),
        kind: FaultKind::classify(FAULT_CODE.load(Ordering::SeqCst)),
    })
}

/// Render `addr` as lowercase hex into `buf`, returning the length used.
fn format_hex(mut addr: usize, buf: &mut [u8]) -> usize {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut scratch = [0u8; 16];
    let mut used = 0;
    loop {
        scratch[used] = DIGITS[addr & 0xf];
        used += 1;
        addr >>= 4;
        if addr == 0 {
            break;
        }
    }
    for (dst, src) in buf.iter_mut().zip(scratch[..used].iter().rev()) {
        *dst = *src;
    }
    used
}

/// Build the stderr line emitted from the SIGSEGV handler. Pure, so it can
/// be unit tested; the handler itself only copies bytes and calls write(2).
fn format_fault_line(address: usize, si_code: i32, buf: &mut [u8]) -> usize {
    let mut len = 0;
    let mut push = |bytes: &[u8], len: &mut usize| {
        let avail = buf.len() - *len;
        let take = bytes.len().min(avail);
        buf[*len..*len + take].copy_from_slice(&bytes[..take]);
        *len += take;
    };
    push(b"capeflow: segmentation fault at 0x", &mut len);
    let mut hex = [0u8; 16];
    let hex_len = format_hex(address, &mut hex);
    push(&hex[..hex_len], &mut len);
    push(b" (", &mut len);
    push(FaultKind::classify(si_code).describe().as_bytes(), &mut len);
    push(b")\n", &mut len);
    len
}

// Runs in signal context: atomics, byte copies and write(2) only. The
// SA_RESETHAND flag already de-installed the handler, so a second fault
// takes the default path instead of looping.
extern "C" fn segfault_handler(_sig: c_int, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    let (address, si_code) = if info.is_null() {
        (0, 0)
    } else {
        // SAFETY: the kernel hands a valid siginfo_t to an SA_SIGINFO handler.
        unsafe { ((*info).si_addr() as usize, (*info).si_code) }
    };
    FAULT_ADDR.store(address, Ordering::SeqCst);
    FAULT_CODE.store(si_code, Ordering::SeqCst);
    FAULT_SEEN.store(true, Ordering::SeqCst);

    let cell = FLOW_CELL.load(Ordering::SeqCst);
    if !cell.is_null() {
        // SAFETY: the cell is a leaked Arc inner, alive for the process.
        unsafe { (*cell).store(ProcessState::Exiting as u8, Ordering::Relaxed) };
    }

    let mut buf = [0u8; 96];
    let len = format_fault_line(address, si_code, &mut buf);
    // SAFETY: write(2) is async-signal-safe; the buffer is on our stack.
    unsafe { libc::write(libc::STDERR_FILENO, buf.as_ptr() as *const libc::c_void, len) };
}

fn install_segfault_handler() -> Result<(), BoardError> {
    // SAFETY: standard sigaction installation; the handler only performs
    // async-signal-safe work.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = segfault_handler as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESETHAND;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(SIGSEGV, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

fn restore_default_disposition(signal: c_int) -> Result<(), BoardError> {
    // SAFETY: resetting to SIG_DFL is always sound.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signal, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

/// Installed signal handling; dropped or [`disable`d](Self::disable) to
/// stop driving the flow state.
pub struct SignalShutdown {
    thread: Option<JoinHandle<()>>,
    handle: Handle,
}

impl SignalShutdown {
    /// Install handlers for SIGINT, SIGTERM, SIGHUP and SIGSEGV, driving
    /// the given flow cell. Each failed registration is reported; nothing
    /// is retried.
    pub fn enable(flow: &FlowState) -> Result<Self, BoardError> {
        // Give the segfault handler a cell that can never dangle. One tiny
        // Arc clone leaks per enable call.
        let leaked = Arc::into_raw(flow.shared_cell()) as *mut AtomicU8;
        FLOW_CELL.store(leaked, Ordering::SeqCst);
        install_segfault_handler()?;

        let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
            .map_err(|err| BoardError::ResourceUnavailable(format!("signal setup: {err}")))?;
        let handle = signals.handle();

        let watcher_flow = flow.clone();
        let thread = thread::Builder::new()
            .name("signal-watcher".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    match signal {
                        SIGINT | SIGTERM => {
                            watcher_flow.set(ProcessState::Exiting);
                            info!(signal, "received shutdown signal, flow state now EXITING");
                        }
                        SIGHUP => {
                            debug!("ignoring SIGHUP, carrying on without the session");
                        }
                        _ => {}
                    }
                }
            })
            .map_err(|err| {
                BoardError::ResourceUnavailable(format!("signal watcher thread: {err}"))
            })?;

        Ok(Self {
            thread: Some(thread),
            handle,
        })
    }

    /// Restore default OS handling for all four signals.
    pub fn disable(mut self) -> Result<(), BoardError> {
        self.stop_watcher();
        let mut first_err = None;
        for signal in [SIGINT, SIGTERM, SIGHUP, SIGSEGV] {
            if let Err(err) = restore_default_disposition(signal) {
                warn!(signal, %err, "failed to restore default signal disposition");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    fn stop_watcher(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SignalShutdown {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_codes() {
        assert_eq!(
            FaultKind::classify(SEGV_MAPERR),
            FaultKind::AddressNotMapped
        );
        assert_eq!(
            FaultKind::classify(SEGV_ACCERR),
            FaultKind::AccessNotPermitted
        );
        assert_eq!(FaultKind::classify(99), FaultKind::Unknown);
    }

    #[test]
    fn test_describe_wording() {
        assert_eq!(FaultKind::AddressNotMapped.describe(), "address not mapped");
        assert_eq!(
            FaultKind::AccessNotPermitted.describe(),
            "access not permitted"
        );
        assert_eq!(FaultKind::Unknown.describe(), "unknown reason");
    }

    #[test]
    fn test_format_hex() {
        let mut buf = [0u8; 16];
        let len = format_hex(0, &mut buf);
        assert_eq!(&buf[..len], b"0");
        let len = format_hex(0xdead_beef, &mut buf);
        assert_eq!(&buf[..len], b"deadbeef");
    }

    #[test]
    fn test_format_fault_line() {
        let mut buf = [0u8; 96];
        let len = format_fault_line(0x1000, SEGV_MAPERR, &mut buf);
        assert_eq!(
            std::str::from_utf8(&buf[..len]).unwrap(),
            "capeflow: segmentation fault at 0x1000 (address not mapped)\n"
        );
    }

    #[test]
    fn test_format_fault_line_never_overflows() {
        let mut buf = [0u8; 8]; // pathologically small
        let len = format_fault_line(usize::MAX, SEGV_ACCERR, &mut buf);
        assert!(len <= buf.len());
    }

    #[test]
    fn test_no_fault_recorded_initially() {
        assert_eq!(last_fault(), None);
    }
}
