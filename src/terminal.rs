//! Controlling-terminal access: window size, TOSTOP discipline, and
//! the foreground-process-group check.

use std::fs::{File, OpenOptions};
use std::os::fd::AsFd;

use nix::sys::termios::{self, LocalFlags, SetArg};
use nix::unistd;
use tracing::debug;

/// Width and height to assume when the terminal cannot be queried.
pub const FALLBACK_WIDTH: usize = 80;
pub const FALLBACK_HEIGHT: usize = 25;

/// Handle on the controlling terminal, if there is one.
pub struct Terminal {
    tty: Option<File>,
    we_set_tostop: bool,
}

impl Terminal {
    /// Opens `/dev/tty`; a process without a controlling terminal gets
    /// a handle that answers with fallbacks.
    pub fn open() -> Self {
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/tty")
            .ok();
        if tty.is_none() {
            debug!("no controlling terminal");
        }
        Terminal {
            tty,
            we_set_tostop: false,
        }
    }

    /// Current terminal size in (columns, rows).
    pub fn size(&self) -> (usize, usize) {
        match crossterm::terminal::size() {
            Ok((w, h)) if w > 0 && h > 0 => (w as usize, h as usize),
            _ => (FALLBACK_WIDTH, FALLBACK_HEIGHT),
        }
    }

    /// Ensures TOSTOP is set so a backgrounded display write raises
    /// SIGTTOU instead of silently interleaving with the foreground
    /// job. Remembers whether we were the ones to set it.
    pub fn init_tostop(&mut self) {
        let Some(tty) = &self.tty else { return };
        let Ok(mut attrs) = termios::tcgetattr(tty.as_fd()) else {
            return;
        };
        if !attrs.local_flags.contains(LocalFlags::TOSTOP) {
            attrs.local_flags.insert(LocalFlags::TOSTOP);
            if termios::tcsetattr(tty.as_fd(), SetArg::TCSANOW, &attrs).is_ok() {
                self.we_set_tostop = true;
            }
        }
    }

    /// Re-asserts TOSTOP after returning to the foreground; only if we
    /// were the ones who turned it on.
    pub fn reassert_tostop(&self) {
        if !self.we_set_tostop {
            return;
        }
        let Some(tty) = &self.tty else { return };
        if let Ok(mut attrs) = termios::tcgetattr(tty.as_fd())
            && !attrs.local_flags.contains(LocalFlags::TOSTOP)
        {
            attrs.local_flags.insert(LocalFlags::TOSTOP);
            let _ = termios::tcsetattr(tty.as_fd(), SetArg::TCSANOW, &attrs);
        }
    }

    /// Clears TOSTOP on exit if this process set it.
    pub fn teardown(&mut self) {
        if !self.we_set_tostop {
            return;
        }
        if let Some(tty) = &self.tty
            && let Ok(mut attrs) = termios::tcgetattr(tty.as_fd())
        {
            attrs.local_flags.remove(LocalFlags::TOSTOP);
            let _ = termios::tcsetattr(tty.as_fd(), SetArg::TCSANOW, &attrs);
        }
        self.we_set_tostop = false;
    }

    /// True when this process is in the terminal's foreground process
    /// group. A failed query (including `ENOTTY` when there is no
    /// controlling terminal) counts as foreground, so redirected and
    /// daemonized invocations keep displaying.
    pub fn in_foreground(&self) -> bool {
        let Some(tty) = &self.tty else { return true };
        match unistd::tcgetpgrp(tty.as_fd()) {
            Ok(pgrp) => pgrp == unistd::getpgrp(),
            Err(_) => true,
        }
    }

    /// Whether SGR colour sequences are worth emitting.
    pub fn supports_color(&self) -> bool {
        match std::env::var("TERM") {
            Ok(term) => !term.is_empty() && term != "dumb",
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_has_fallback() {
        let t = Terminal::open();
        let (w, h) = t.size();
        assert!(w > 0 && h > 0);
    }

    #[test]
    fn foreground_defaults_to_true_without_tty() {
        let t = Terminal {
            tty: None,
            we_set_tostop: false,
        };
        assert!(t.in_foreground());
    }
}
