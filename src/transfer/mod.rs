//! The transfer core: moves data from the current input to the output,
//! one bounded step at a time.
//!
//! Each step returns promptly (poll-bounded reads and writes) so the
//! main loop can keep its display and housekeeping cadence. Two code
//! paths exist: a buffered read/write path, and a zero-copy splice path
//! used when neither counting nor display needs the data staged in
//! userspace.

pub mod buffered;
pub mod lines;
pub mod splice;

use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};

use nix::errno::Errno;
#[cfg(target_os = "linux")]
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::error::TransferError;
use crate::input::Input;
use crate::options::Config;
use lines::LineTracker;

/// Upper bound on a single read.
pub const MAX_READ_AT_ONCE: usize = 512 * 1024;
/// Upper bound on a single write.
pub const MAX_WRITE_AT_ONCE: usize = 512 * 1024;
/// How long one step may wait for the input to become readable.
pub const READ_TIMEOUT_MS: u16 = 90;
/// How long one step may wait for the output to accept data.
pub const WRITE_TIMEOUT_MS: u16 = 900;
/// Buffer size when the input block size is unknown.
pub const DEFAULT_BUFFER_SIZE: usize = 400 * 1024;
/// Cap for the automatically chosen buffer size.
pub const MAX_AUTO_BUFFER_SIZE: usize = 512 * 1024;
/// Largest single skip while recovering from read errors.
pub const MAX_ERROR_SKIP: u64 = 512;

/// Automatic buffer size: 32 input blocks, capped.
pub fn auto_buffer_size(blksize: usize) -> usize {
    if blksize == 0 {
        DEFAULT_BUFFER_SIZE
    } else {
        (blksize * 32).min(MAX_AUTO_BUFFER_SIZE)
    }
}

// ---------------------------------------------------------------------------
// Fd helpers
// ---------------------------------------------------------------------------

/// Waits for `fd` to become readable (or writable); returns false on
/// timeout or interruption, so the caller just retries next step.
pub fn wait_fd<F: AsFd>(fd: F, for_write: bool, timeout_ms: u16) -> io::Result<bool> {
    let events = if for_write {
        PollFlags::POLLOUT
    } else {
        PollFlags::POLLIN
    };
    let mut fds = [PollFd::new(fd.as_fd(), events)];
    match poll(&mut fds, PollTimeout::from(timeout_ms)) {
        Ok(n) => Ok(n > 0),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Bytes sitting in a pipe that the consumer has not yet read.
/// nix has no FIONREAD wrapper, so this one ioctl stays raw.
pub fn pipe_backlog(fd: RawFd) -> io::Result<u64> {
    let mut n: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut n) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n.max(0) as u64)
    }
}

/// Toggles `O_DIRECT` on a descriptor. Failure is ignored: not every
/// filesystem supports direct I/O and the transfer must go on.
#[cfg(target_os = "linux")]
pub fn set_direct_io<F: AsFd>(fd: F, on: bool) {
    let raw = fd.as_fd().as_raw_fd();
    let Ok(bits) = fcntl(raw, FcntlArg::F_GETFL) else {
        return;
    };
    let mut flags = OFlag::from_bits_truncate(bits);
    if flags.contains(OFlag::O_DIRECT) == on {
        return;
    }
    flags.set(OFlag::O_DIRECT, on);
    let _ = fcntl(raw, FcntlArg::F_SETFL(flags));
}

#[cfg(not(target_os = "linux"))]
pub fn set_direct_io<F: AsFd>(_fd: F, _on: bool) {}

// ---------------------------------------------------------------------------
// Output sink
// ---------------------------------------------------------------------------

/// The opened output.
pub struct Output {
    pub file: File,
    pub name: String,
    pub is_pipe: bool,
}

impl Output {
    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

// ---------------------------------------------------------------------------
// Transfer state
// ---------------------------------------------------------------------------

/// Read-error recovery state, reset on every input advance.
#[derive(Debug, Default)]
struct SkipState {
    errors_in_a_row: u32,
    /// Warning already printed for this input.
    warned: bool,
    /// Read offset within the current input.
    input_pos: u64,
}

/// What one step accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepResult {
    /// Bytes handed to the output (or skipped over it under discard).
    pub written: u64,
    /// Delimiters among those bytes.
    pub lines: u64,
}

/// Per-step decision inputs the engine derives from display state.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepLimits {
    /// Token-bucket allowance for this step; `None` = unlimited.
    pub cansend: Option<u64>,
    /// Any display component needs the data staged in the buffer.
    pub display_needs_buffer: bool,
    /// Bytes remaining before a size cap, when one applies.
    pub cap_remaining: Option<u64>,
    /// In line mode, at most this many delimiters may be written.
    pub line_cap: Option<u64>,
}

/// The transfer engine state: the staging buffer and both EOF flags.
pub struct Transfer {
    buf: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    pub eof_in: bool,
    pub eof_out: bool,
    skip: SkipState,
    /// Descriptors splice refused; never retried.
    splice_failed: Vec<RawFd>,
    /// The zero-copy path has moved data this run.
    pub splice_used: bool,
    pub tracker: LineTracker,
}

impl Transfer {
    pub fn new(tracker: LineTracker) -> Self {
        Transfer {
            buf: Vec::new(),
            read_pos: 0,
            write_pos: 0,
            eof_in: false,
            eof_out: false,
            skip: SkipState::default(),
            splice_failed: Vec::new(),
            splice_used: false,
            tracker,
        }
    }

    /// Grows or shrinks the staging buffer to `target` bytes. Growth
    /// failures surface as allocation errors; a shrink that would drop
    /// buffered data is deferred until the data drains.
    pub fn set_buffer_size(&mut self, target: usize) -> Result<(), TransferError> {
        let target = target.max(1);
        if target == self.buf.len() {
            return Ok(());
        }
        if target > self.buf.len() {
            let additional = target - self.buf.len();
            self.buf
                .try_reserve_exact(additional)
                .map_err(|_| TransferError::Alloc(target))?;
            self.buf.resize(target, 0);
            return Ok(());
        }
        self.compact();
        if self.read_pos <= target {
            self.buf.truncate(target);
            self.buf.shrink_to_fit();
        }
        Ok(())
    }

    pub fn buffer_size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes read but not yet written, over the buffer size, as a
    /// percentage. The display shows `----` instead when splicing.
    pub fn buffer_percent(&self) -> u64 {
        if self.buf.is_empty() {
            return 0;
        }
        ((self.read_pos - self.write_pos) as u64 * 100) / self.buf.len() as u64
    }

    /// Unwritten buffered bytes.
    pub fn buffered(&self) -> usize {
        self.read_pos - self.write_pos
    }

    /// Adjusts line tracking after a display reconfiguration.
    pub fn set_tracking(&mut self, tail_cap: usize, track_lines: bool) {
        self.tracker.configure(tail_cap, track_lines);
    }

    /// Resets per-input state when advancing to the next input.
    pub fn next_input(&mut self) {
        self.eof_in = false;
        self.eof_out = false;
        self.skip = SkipState::default();
    }

    fn compact(&mut self) {
        if self.write_pos == self.read_pos {
            self.write_pos = 0;
            self.read_pos = 0;
        } else if self.write_pos > 0 {
            self.buf.copy_within(self.write_pos..self.read_pos, 0);
            self.read_pos -= self.write_pos;
            self.write_pos = 0;
        }
    }

    fn splice_rejected(&self, fd: RawFd) -> bool {
        self.splice_failed.contains(&fd)
    }

    fn reject_splice(&mut self, fd: RawFd) {
        if !self.splice_failed.contains(&fd) {
            self.splice_failed.push(fd);
        }
    }

    /// Whether this step may use the zero-copy path.
    fn splice_eligible(
        &self,
        cfg: &Config,
        limits: &StepLimits,
        input: &Input,
        output: &Output,
    ) -> bool {
        if cfg!(not(target_os = "linux")) {
            return false;
        }
        if cfg.no_splice
            || cfg.discard
            || cfg.line_mode
            || cfg.skip_errors > 0
            || limits.display_needs_buffer
        {
            return false;
        }
        // A fine-grained rate limit needs byte-accurate writes.
        if cfg.rate_limit > 0 && (cfg.rate_limit as usize) < self.buf.len().max(1) {
            return false;
        }
        // Close to a size cap, fall back for byte accuracy.
        if let Some(remaining) = limits.cap_remaining
            && remaining < MAX_WRITE_AT_ONCE as u64
        {
            return false;
        }
        if !(input.is_pipe || output.is_pipe) {
            return false;
        }
        !self.splice_rejected(input.file.as_raw_fd()) && !self.splice_rejected(output.fd())
    }

    /// Advances the transfer by one bounded step.
    pub fn step(
        &mut self,
        input: &mut Input,
        output: &Output,
        cfg: &Config,
        limits: StepLimits,
    ) -> Result<StepResult, TransferError> {
        if self.splice_eligible(cfg, &limits, input, output) {
            match splice::step(self, input, output, &limits)? {
                Some(result) => return Ok(result),
                // Splice refused this pairing; fall through to the
                // buffered path for this and every later step.
                None => {}
            }
        }
        buffered::step(self, input, output, cfg, &limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_transfer() -> Transfer {
        Transfer::new(LineTracker::new(b'\n', false, 0, false))
    }

    #[test]
    fn auto_buffer_size_rules() {
        assert_eq!(auto_buffer_size(0), DEFAULT_BUFFER_SIZE);
        assert_eq!(auto_buffer_size(4096), 4096 * 32);
        assert_eq!(auto_buffer_size(1 << 20), MAX_AUTO_BUFFER_SIZE);
    }

    #[test]
    fn buffer_resize_and_percent() {
        let mut t = plain_transfer();
        t.set_buffer_size(1000).unwrap();
        assert_eq!(t.buffer_size(), 1000);
        t.read_pos = 500;
        assert_eq!(t.buffer_percent(), 50);
        t.set_buffer_size(2000).unwrap();
        assert_eq!(t.buffer_size(), 2000);
        assert_eq!(t.read_pos, 500);
    }

    #[test]
    fn shrink_defers_while_data_buffered() {
        let mut t = plain_transfer();
        t.set_buffer_size(1000).unwrap();
        t.read_pos = 800;
        t.write_pos = 100;
        t.set_buffer_size(200).unwrap();
        // 700 bytes still buffered: shrink deferred, data compacted.
        assert_eq!(t.buffer_size(), 1000);
        assert_eq!(t.write_pos, 0);
        assert_eq!(t.read_pos, 700);
    }

    #[test]
    fn compact_moves_tail_to_front() {
        let mut t = plain_transfer();
        t.set_buffer_size(10).unwrap();
        t.buf[..6].copy_from_slice(b"abcdef");
        t.read_pos = 6;
        t.write_pos = 4;
        t.compact();
        assert_eq!(&t.buf[..2], b"ef");
        assert_eq!(t.read_pos, 2);
        assert_eq!(t.write_pos, 0);
    }

    #[test]
    fn splice_rejection_is_sticky() {
        let mut t = plain_transfer();
        t.reject_splice(7);
        t.reject_splice(7);
        assert!(t.splice_rejected(7));
        assert!(!t.splice_rejected(8));
        assert_eq!(t.splice_failed.len(), 1);
    }
}
