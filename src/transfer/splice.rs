//! The zero-copy transfer path: `splice(2)` directly between kernel
//! buffers, used when nothing needs the data staged in userspace.
//!
//! Not every kernel supports splice for every descriptor pairing, so a
//! refusal is remembered per input fd and never retried.

#[cfg(target_os = "linux")]
use std::io;
#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;

use crate::error::TransferError;
use crate::input::Input;

use super::{Output, StepLimits, StepResult, Transfer};
#[cfg(target_os = "linux")]
use super::{MAX_WRITE_AT_ONCE, READ_TIMEOUT_MS, WRITE_TIMEOUT_MS, wait_fd};

/// One zero-copy step. `Ok(None)` means splice refused this pairing;
/// the caller falls back to the buffered path.
#[cfg(target_os = "linux")]
pub(super) fn step(
    t: &mut Transfer,
    input: &mut Input,
    output: &Output,
    limits: &StepLimits,
) -> Result<Option<StepResult>, TransferError> {
    let in_fd = input.file.as_raw_fd();
    let out_fd = output.fd();

    let mut len = MAX_WRITE_AT_ONCE;
    if let Some(c) = limits.cansend {
        len = len.min(c as usize);
    }
    if len == 0 {
        return Ok(Some(StepResult::default()));
    }
    if !wait_fd(&output.file, true, WRITE_TIMEOUT_MS).map_err(TransferError::Write)? {
        return Ok(Some(StepResult::default()));
    }
    if !wait_fd(&input.file, false, READ_TIMEOUT_MS).map_err(TransferError::Read)? {
        return Ok(Some(StepResult::default()));
    }

    let n = unsafe {
        libc::splice(
            in_fd,
            std::ptr::null_mut(),
            out_fd,
            std::ptr::null_mut(),
            len,
            libc::SPLICE_F_MORE,
        )
    };
    if n < 0 {
        let e = io::Error::last_os_error();
        return match e.raw_os_error() {
            Some(libc::EINVAL) | Some(libc::ENOSYS) => {
                t.reject_splice(in_fd);
                Ok(None)
            }
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(Some(StepResult::default())),
            Some(libc::EPIPE) => {
                crate::signals::set_pipe_closed();
                t.eof_in = true;
                t.eof_out = true;
                Ok(Some(StepResult::default()))
            }
            _ => Err(TransferError::Write(e)),
        };
    }
    if n == 0 {
        // The splice path never stages data, so input EOF is output EOF.
        t.eof_in = true;
        t.eof_out = true;
        return Ok(Some(StepResult::default()));
    }
    t.splice_used = true;
    Ok(Some(StepResult {
        written: n as u64,
        lines: 0,
    }))
}

#[cfg(not(target_os = "linux"))]
pub(super) fn step(
    _t: &mut Transfer,
    _input: &mut Input,
    _output: &Output,
    _limits: &StepLimits,
) -> Result<Option<StepResult>, TransferError> {
    Ok(None)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::transfer::lines::LineTracker;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::FromRawFd;

    fn os_pipe() -> (File, File) {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) }
    }

    #[test]
    fn splices_pipe_to_pipe() {
        let (in_read, mut in_write) = os_pipe();
        let (mut out_read, out_write) = os_pipe();
        in_write.write_all(b"zero copy payload").unwrap();
        drop(in_write);

        let mut t = Transfer::new(LineTracker::new(b'\n', false, 0, false));
        let mut input =
            Input::from_file(in_read, "pipe".to_string());
        let output = Output {
            file: out_write,
            name: "pipe".to_string(),
            is_pipe: true,
        };

        let mut moved = 0u64;
        for _ in 0..10 {
            let r = step(&mut t, &mut input, &output, &StepLimits::default())
                .unwrap()
                .expect("pipe-to-pipe splice must not fall back");
            moved += r.written;
            if t.eof_out {
                break;
            }
        }
        drop(output);
        assert_eq!(moved, 17);
        assert!(t.splice_used);
        let mut got = String::new();
        out_read.read_to_string(&mut got).unwrap();
        assert_eq!(got, "zero copy payload");
    }

    #[test]
    fn cansend_zero_moves_nothing() {
        let (in_read, _in_write) = os_pipe();
        let (_out_read, out_write) = os_pipe();
        let mut t = Transfer::new(LineTracker::new(b'\n', false, 0, false));
        let mut input = Input::from_file(in_read, "pipe".to_string());
        let output = Output {
            file: out_write,
            name: "pipe".to_string(),
            is_pipe: true,
        };
        let limits = StepLimits {
            cansend: Some(0),
            ..StepLimits::default()
        };
        let r = step(&mut t, &mut input, &output, &limits).unwrap().unwrap();
        assert_eq!(r.written, 0);
    }
}
