//! The buffered transfer path: read into the staging buffer, write
//! from it, with the read-error skip policy layered on the read side.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::TransferError;
use crate::input::Input;
use crate::options::Config;
use crate::signals;

use super::{
    MAX_ERROR_SKIP, MAX_READ_AT_ONCE, MAX_WRITE_AT_ONCE, Output, READ_TIMEOUT_MS, StepLimits,
    StepResult, Transfer, WRITE_TIMEOUT_MS, wait_fd,
};

pub(super) fn step(
    t: &mut Transfer,
    input: &mut Input,
    output: &Output,
    cfg: &Config,
    limits: &StepLimits,
) -> Result<StepResult, TransferError> {
    read_phase(t, input, cfg, limits)?;
    let result = write_phase(t, output, cfg, limits)?;

    if t.write_pos == t.read_pos {
        t.write_pos = 0;
        t.read_pos = 0;
    } else if t.read_pos == t.buf.len() && t.write_pos > 0 {
        t.compact();
    }
    if t.eof_in && t.read_pos == t.write_pos {
        t.eof_out = true;
    }
    Ok(result)
}

fn read_phase(
    t: &mut Transfer,
    input: &mut Input,
    cfg: &Config,
    limits: &StepLimits,
) -> Result<(), TransferError> {
    if t.eof_in || t.read_pos >= t.buf.len() {
        return Ok(());
    }
    let mut toread = (t.buf.len() - t.read_pos).min(MAX_READ_AT_ONCE);
    if let Some(c) = limits.cansend {
        toread = toread.min(c as usize);
    }
    if toread == 0 {
        return Ok(());
    }
    if !wait_fd(&input.file, false, READ_TIMEOUT_MS).map_err(TransferError::Read)? {
        return Ok(());
    }
    match (&input.file).read(&mut t.buf[t.read_pos..t.read_pos + toread]) {
        Ok(0) => t.eof_in = true,
        Ok(n) => {
            t.read_pos += n;
            t.skip.errors_in_a_row = 0;
            t.skip.input_pos += n as u64;
        }
        Err(e)
            if e.kind() == io::ErrorKind::Interrupted
                || e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => recover_read_error(t, input, cfg, e)?,
    }
    Ok(())
}

/// Applies the skip-errors policy to one failed read: warn, advance
/// past the bad region, and stand in null bytes for the skipped range.
fn recover_read_error(
    t: &mut Transfer,
    input: &mut Input,
    cfg: &Config,
    e: io::Error,
) -> Result<(), TransferError> {
    if cfg.skip_errors == 0 {
        return Err(TransferError::Read(e));
    }
    t.skip.errors_in_a_row += 1;
    if t.skip.errors_in_a_row == 1 && !t.skip.warned {
        eprintln!(
            "flowcat: {}: read error: {} (skipping)",
            input.name, e
        );
        if cfg.skip_errors >= 2 {
            t.skip.warned = true;
        }
    }

    let skip = if cfg.error_skip_block > 0 {
        // Round up to the next multiple of the fixed block.
        let b = cfg.error_skip_block;
        (t.skip.input_pos / b + 1) * b - t.skip.input_pos
    } else {
        // Adaptive: 1, 2, 4, ... bytes per successive error.
        (1u64 << (t.skip.errors_in_a_row - 1).min(9)).min(MAX_ERROR_SKIP)
    };

    if input.seekable {
        let _ = (&input.file).seek(SeekFrom::Start(t.skip.input_pos + skip));
    }
    let space = t.buf.len() - t.read_pos;
    let zeros = (skip as usize).min(space);
    t.buf[t.read_pos..t.read_pos + zeros].fill(0);
    t.read_pos += zeros;
    t.skip.input_pos += skip;
    Ok(())
}

fn write_phase(
    t: &mut Transfer,
    output: &Output,
    cfg: &Config,
    limits: &StepLimits,
) -> Result<StepResult, TransferError> {
    let mut result = StepResult::default();
    if t.write_pos >= t.read_pos {
        return Ok(result);
    }
    let mut towrite = (t.read_pos - t.write_pos).min(MAX_WRITE_AT_ONCE);
    if let Some(c) = limits.cansend {
        towrite = towrite.min(c as usize);
    }
    if let Some(cap) = limits.line_cap {
        // Cut the write just past the cap-th delimiter so a line-mode
        // size cap stops on an exact line boundary.
        let delim = if cfg.null_delimiter { 0u8 } else { b'\n' };
        let mut seen = 0u64;
        for (i, &b) in t.buf[t.write_pos..t.write_pos + towrite].iter().enumerate() {
            if b == delim {
                seen += 1;
                if seen >= cap {
                    towrite = i + 1;
                    break;
                }
            }
        }
    }
    if towrite == 0 {
        return Ok(result);
    }

    let n = if cfg.discard {
        // No write happens, but every counter behaves as though it did.
        towrite
    } else {
        if !wait_fd(&output.file, true, WRITE_TIMEOUT_MS).map_err(TransferError::Write)? {
            return Ok(result);
        }
        match (&output.file).write(&t.buf[t.write_pos..t.write_pos + towrite]) {
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                0
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                // The consumer went away: an orderly end, not a failure.
                signals::set_pipe_closed();
                t.eof_in = true;
                t.eof_out = true;
                return Ok(result);
            }
            Err(e) => return Err(TransferError::Write(e)),
        }
    };

    if n > 0 {
        result.lines = t.tracker.observe(&t.buf[t.write_pos..t.write_pos + n]);
        result.written = n as u64;
        t.write_pos += n;
        if cfg.sync_after_write && !cfg.discard {
            unsafe {
                libc::fdatasync(output.fd());
            }
        }
    }
    Ok(result)
}
