//! Error types and the process exit-status bitmask.
//!
//! The engine classifies failures into bits that are OR-ed together and
//! returned as the process exit status, so a single run can report both
//! an unreadable input and a failed write.

use std::io;

// ---------------------------------------------------------------------------
// Exit-status bits
// ---------------------------------------------------------------------------

/// Exit-status bits. The final exit code is the bitwise OR of every
/// condition that occurred during the run.
pub mod exit {
    /// An input could not be accessed.
    pub const ACCESS: i32 = 2;
    /// An input was the same file as the output.
    pub const SAME_FILE: i32 = 4;
    /// Closing or advancing past an input failed.
    pub const ADVANCE: i32 = 8;
    /// The transfer itself failed (fatal read or write error).
    pub const TRANSFER: i32 = 16;
    /// A terminating signal was received.
    pub const SIGNAL: i32 = 32;
    /// A heap allocation failed.
    pub const ALLOC: i32 = 64;
}

// ---------------------------------------------------------------------------
// Transfer errors
// ---------------------------------------------------------------------------

/// Fatal condition raised by a transfer step.
#[derive(Debug)]
pub enum TransferError {
    /// A read failed and error skipping is disabled.
    Read(io::Error),
    /// A write failed with anything other than `EINTR`/`EAGAIN`/`EPIPE`.
    Write(io::Error),
    /// Growing the transfer buffer failed.
    Alloc(usize),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Read(e) => write!(f, "read error: {}", e),
            TransferError::Write(e) => write!(f, "write error: {}", e),
            TransferError::Alloc(n) => write!(f, "buffer allocation of {} bytes failed", n),
        }
    }
}

impl std::error::Error for TransferError {}

impl TransferError {
    /// Maps the error onto its exit-status bit.
    pub fn exit_bit(&self) -> i32 {
        match self {
            TransferError::Read(_) | TransferError::Write(_) => exit::TRANSFER,
            TransferError::Alloc(_) => exit::ALLOC,
        }
    }
}

// ---------------------------------------------------------------------------
// Remote-control errors
// ---------------------------------------------------------------------------

/// Failure in the remote-control sender. Sender mode reports these on
/// stderr and exits with code 1; they never reach the engine.
#[derive(Debug)]
pub enum RemoteError {
    /// The target process does not exist or is not ours to signal.
    NoSuchProcess(u32),
    /// No writable runtime directory for the message queue.
    NoRuntimeDir,
    /// I/O error on the message file.
    Io(io::Error),
    /// Encoding or decoding the message failed.
    Codec(String),
    /// The target did not pick the message up in time.
    Timeout,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::NoSuchProcess(pid) => write!(f, "process {} not found", pid),
            RemoteError::NoRuntimeDir => write!(f, "no writable runtime directory"),
            RemoteError::Io(e) => write!(f, "message queue error: {}", e),
            RemoteError::Codec(msg) => write!(f, "message format error: {}", msg),
            RemoteError::Timeout => write!(f, "target process did not accept the message"),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<io::Error> for RemoteError {
    fn from(e: io::Error) -> Self {
        RemoteError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_bits_are_distinct_powers_of_two() {
        let bits = [
            exit::ACCESS,
            exit::SAME_FILE,
            exit::ADVANCE,
            exit::TRANSFER,
            exit::SIGNAL,
            exit::ALLOC,
        ];
        for (i, a) in bits.iter().enumerate() {
            assert_eq!(a.count_ones(), 1);
            for b in &bits[i + 1..] {
                assert_eq!(a & b, 0);
            }
        }
    }

    #[test]
    fn transfer_error_maps_to_bits() {
        let read = TransferError::Read(io::Error::other("boom"));
        let write = TransferError::Write(io::Error::other("boom"));
        let alloc = TransferError::Alloc(4096);
        assert_eq!(read.exit_bit(), exit::TRANSFER);
        assert_eq!(write.exit_bit(), exit::TRANSFER);
        assert_eq!(alloc.exit_bit(), exit::ALLOC);
    }
}
