//! Signal supervision for the transfer loop.
//!
//! Handlers never branch into engine logic: they only write atomic
//! flags (plus the stopped-time pair) that the main loop reads on its
//! next natural turn. The handler bodies restrict themselves to
//! async-signal-safe calls (`clock_gettime`, `open`, `dup`, `dup2`,
//! `close`, `raise`).

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::clock;

static TRIGGER_EXIT: AtomicBool = AtomicBool::new(false);
static TERMINAL_RESIZED: AtomicBool = AtomicBool::new(false);
static PIPE_CLOSED: AtomicBool = AtomicBool::new(false);
static STDERR_SUSPENDED: AtomicBool = AtomicBool::new(false);
static CURSOR_REINIT: AtomicBool = AtomicBool::new(false);
/// Monotonic nanoseconds at the moment of SIGTSTP; 0 = not stopped.
static TSTP_NANOS: AtomicU64 = AtomicU64::new(0);
/// Cumulative nanoseconds spent stopped, advanced on SIGCONT.
static STOPPED_NANOS: AtomicU64 = AtomicU64::new(0);
/// Original stderr fd while it is redirected to /dev/null; -1 = none.
static SAVED_STDERR: AtomicI32 = AtomicI32::new(-1);

/// Signals the supervisor traps.
const TRAPPED: [Signal; 8] = [
    Signal::SIGPIPE,
    Signal::SIGTTOU,
    Signal::SIGTSTP,
    Signal::SIGCONT,
    Signal::SIGWINCH,
    Signal::SIGINT,
    Signal::SIGHUP,
    Signal::SIGTERM,
];

extern "C" fn handle_signal(sig: libc::c_int) {
    match sig {
        libc::SIGPIPE => {
            PIPE_CLOSED.store(true, Ordering::SeqCst);
        }
        libc::SIGTTOU => {
            // We wrote to the terminal from the background. Swap stderr
            // for /dev/null so the display stops raising SIGTTOU until
            // we are continued in the foreground.
            let null = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY) };
            if null >= 0 {
                if SAVED_STDERR.load(Ordering::SeqCst) < 0 {
                    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
                    SAVED_STDERR.store(saved, Ordering::SeqCst);
                }
                unsafe {
                    libc::dup2(null, libc::STDERR_FILENO);
                    libc::close(null);
                }
                STDERR_SUSPENDED.store(true, Ordering::SeqCst);
            }
        }
        libc::SIGTSTP => {
            TSTP_NANOS.store(clock::monotonic_nanos_raw().max(1), Ordering::SeqCst);
            unsafe {
                libc::raise(libc::SIGSTOP);
            }
        }
        libc::SIGCONT => {
            let stopped_at = TSTP_NANOS.swap(0, Ordering::SeqCst);
            if stopped_at > 0 {
                let now = clock::monotonic_nanos_raw();
                STOPPED_NANOS.fetch_add(now.saturating_sub(stopped_at), Ordering::SeqCst);
            }
            restore_stderr_fd();
            TERMINAL_RESIZED.store(true, Ordering::SeqCst);
            CURSOR_REINIT.store(true, Ordering::SeqCst);
        }
        libc::SIGWINCH => {
            TERMINAL_RESIZED.store(true, Ordering::SeqCst);
        }
        libc::SIGINT | libc::SIGHUP | libc::SIGTERM => {
            TRIGGER_EXIT.store(true, Ordering::SeqCst);
        }
        _ => {}
    }
}

fn restore_stderr_fd() {
    let saved = SAVED_STDERR.swap(-1, Ordering::SeqCst);
    if saved >= 0 {
        unsafe {
            libc::dup2(saved, libc::STDERR_FILENO);
            libc::close(saved);
        }
        STDERR_SUSPENDED.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

/// Installed-handler record; restores the previous dispositions on
/// teardown so a library embedding does not leak our handlers.
pub struct SignalGuard {
    old: Vec<(Signal, SigAction)>,
}

/// Installs the supervisor's handlers and resets all latched flags.
pub fn install() -> io::Result<SignalGuard> {
    TRIGGER_EXIT.store(false, Ordering::SeqCst);
    TERMINAL_RESIZED.store(false, Ordering::SeqCst);
    PIPE_CLOSED.store(false, Ordering::SeqCst);
    STDERR_SUSPENDED.store(false, Ordering::SeqCst);
    CURSOR_REINIT.store(false, Ordering::SeqCst);
    TSTP_NANOS.store(0, Ordering::SeqCst);
    STOPPED_NANOS.store(0, Ordering::SeqCst);
    SAVED_STDERR.store(-1, Ordering::SeqCst);

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let mut old = Vec::with_capacity(TRAPPED.len());
    for sig in TRAPPED {
        let prev = unsafe { signal::sigaction(sig, &action) }.map_err(io::Error::from)?;
        old.push((sig, prev));
    }
    Ok(SignalGuard { old })
}

impl SignalGuard {
    /// Restores the previous signal dispositions and un-redirects
    /// stderr if a SIGTTOU left it pointing at /dev/null.
    pub fn teardown(self) {
        restore_stderr_fd();
        for (sig, prev) in self.old {
            // Best effort; failing to restore a disposition on exit is
            // not actionable.
            let _ = unsafe { signal::sigaction(sig, &prev) };
        }
    }
}

// ---------------------------------------------------------------------------
// Flag accessors (single reader: the main loop)
// ---------------------------------------------------------------------------

/// A terminating signal (SIGINT/SIGHUP/SIGTERM) has been latched.
pub fn exit_requested() -> bool {
    TRIGGER_EXIT.load(Ordering::SeqCst)
}

/// The output pipe was reported closed, by SIGPIPE or by `EPIPE`.
pub fn pipe_closed() -> bool {
    PIPE_CLOSED.load(Ordering::SeqCst)
}

/// Records an `EPIPE` write result; equivalent to receiving SIGPIPE.
pub fn set_pipe_closed() {
    PIPE_CLOSED.store(true, Ordering::SeqCst);
}

/// Consumes the terminal-resized latch.
pub fn take_resize() -> bool {
    TERMINAL_RESIZED.swap(false, Ordering::SeqCst)
}

/// Consumes the cursor-reinitialise latch (set on SIGCONT).
pub fn take_cursor_reinit() -> bool {
    CURSOR_REINIT.swap(false, Ordering::SeqCst)
}

/// Display writes must be skipped while stderr points at /dev/null.
pub fn stderr_suspended() -> bool {
    STDERR_SUSPENDED.load(Ordering::SeqCst)
}

/// Cumulative time spent stopped, subtracted from wall-clock elapsed.
pub fn stopped_nanos() -> u64 {
    STOPPED_NANOS.load(Ordering::SeqCst)
}

/// Zeroes the stopped-time accumulator (used when `--wait` restarts
/// the elapsed clock at the first transferred byte).
pub fn reset_stopped() {
    STOPPED_NANOS.store(0, Ordering::SeqCst);
}

/// Once-per-second background probe: if stderr is still parked on
/// /dev/null, put the saved fd back. If we are genuinely still in the
/// background the next display write raises SIGTTOU again and the
/// handler re-parks it. Returns true when a restore happened, so the
/// caller can re-assert TOSTOP and reinitialise the cursor.
pub fn background_check() -> bool {
    if SAVED_STDERR.load(Ordering::SeqCst) >= 0 {
        restore_stderr_fd();
        return true;
    }
    false
}
