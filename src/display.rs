//! The display driver: turns engine state into terminal output at the
//! right cadence, in the right mode.
//!
//! Modes: the default one-line repaint (carriage return, no newline),
//! numeric mode (one machine-readable line per tick), and cursor mode
//! (repaint a reserved row). The window-title and process-title extras
//! piggyback on whichever mode is active.

use std::io::{self, IsTerminal, Write};

use tracing::trace;

use crate::format::render::{self, RenderContext};
use crate::format::{Compiled, ShowFlags, compile};
use crate::options::Config;
use crate::signals;
use crate::terminal::Terminal;

/// Most stale columns a shrinking line will blank out.
const MAX_SHRINK_PAD: usize = 15;

/// Display state: the compiled format and repaint bookkeeping.
pub struct Display {
    compiled: Compiled,
    format: String,
    /// Columns painted last time, including any shrink padding.
    prev_painted: usize,
    prev_terminal_width: usize,
    /// A line has been painted; the engine finishes with a newline.
    pub visible: bool,
    /// Cursor mode has reserved its row.
    row_ready: bool,
}

impl Display {
    pub fn new(cfg: &Config) -> Self {
        let format = cfg.effective_format();
        Display {
            compiled: compile(&format),
            format,
            prev_painted: 0,
            prev_terminal_width: 0,
            visible: false,
            row_ready: false,
        }
    }

    /// Recompiles after a format change or a remote reparse request.
    /// Reparsing an unchanged string yields an identical plan.
    pub fn recompile(&mut self, cfg: &Config) {
        self.format = cfg.effective_format();
        self.compiled = compile(&self.format);
    }

    /// What the compiled format needs from the engine.
    pub fn shows(&self) -> &ShowFlags {
        &self.compiled.shows
    }

    /// The cursor row must be re-allocated (after SIGCONT).
    pub fn reinit_cursor(&mut self) {
        self.row_ready = false;
    }

    /// Whether output is currently allowed at all.
    fn gate_open(&self, cfg: &Config, terminal: &Terminal) -> bool {
        if cfg.quiet {
            return false;
        }
        if signals::stderr_suspended() {
            return false;
        }
        if !cfg.force && !terminal.in_foreground() {
            return false;
        }
        // The one-line repaint needs a terminal; numeric mode is meant
        // for scripts and writes wherever stderr points.
        if !cfg.numeric && !cfg.force && !io::stderr().is_terminal() {
            return false;
        }
        true
    }

    /// Renders and writes one update.
    pub fn paint(
        &mut self,
        cfg: &Config,
        terminal: &Terminal,
        ctx: &RenderContext<'_>,
        terminal_width: usize,
    ) {
        if !self.gate_open(cfg, terminal) {
            return;
        }
        if cfg.numeric {
            self.paint_numeric(ctx);
            return;
        }

        let mut line = render::render(&self.compiled, ctx, terminal_width);
        let width = render::visible_width(&line);
        let mut painted = width;
        let widened =
            self.prev_terminal_width != 0 && terminal_width > self.prev_terminal_width;
        if !widened && width < self.prev_painted {
            // Overwrite stale columns left behind by a longer line.
            let pad = (self.prev_painted - width).min(MAX_SHRINK_PAD);
            line.extend(std::iter::repeat_n(' ', pad));
            painted += pad;
        }
        self.prev_painted = painted;
        self.prev_terminal_width = terminal_width;

        let mut err = io::stderr().lock();
        if cfg.cursor {
            if !self.row_ready {
                // Reserve a row; later paints move back up to it.
                let _ = writeln!(err, "{}", line);
                self.row_ready = true;
            } else {
                let _ = write!(err, "\x1b[A\r{}\n", line);
            }
        } else {
            let _ = write!(err, "{}\r", line);
        }
        let _ = err.flush();
        self.visible = true;
        trace!(width, terminal_width, "painted");

        self.paint_titles(cfg, &line);
    }

    /// Numeric mode: whitespace-separated values in a fixed order
    /// (timer, count, rate, percentage), one line per tick.
    fn paint_numeric(&mut self, ctx: &RenderContext<'_>) {
        let shows = &self.compiled.shows;
        let mut values: Vec<String> = Vec::with_capacity(4);
        if shows.timer {
            values.push(format!("{:.2}", ctx.elapsed));
        }
        if shows.bytes {
            values.push(ctx.transferred.to_string());
        }
        if shows.rate {
            values.push(format!("{:.2}", ctx.rate));
        }
        if shows.progress || values.is_empty() {
            let pct = if ctx.size > 0 {
                ctx.percentage.min(100_000.0)
            } else if ctx.percentage > 100.0 {
                200.0 - ctx.percentage
            } else {
                ctx.percentage
            };
            values.push(format!("{}", pct as i64));
        }
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{}", values.join(" "));
        let _ = err.flush();
        self.visible = true;
    }

    fn paint_titles(&self, cfg: &Config, line: &str) {
        if cfg.extra.window_title {
            let mut err = io::stderr().lock();
            let _ = write!(err, "\x1b]2;{}\x1b\\", line.trim_end());
            let _ = err.flush();
        }
        if cfg.extra.process_title {
            set_process_title(line.trim_end());
        }
    }
}

/// Best-effort process title via `prctl(PR_SET_NAME)`; the kernel caps
/// the comm name at 15 bytes.
#[cfg(target_os = "linux")]
fn set_process_title(title: &str) {
    let mut bytes: Vec<u8> = title.bytes().take(15).collect();
    bytes.push(0);
    unsafe {
        libc::prctl(libc::PR_SET_NAME, bytes.as_ptr() as libc::c_ulong, 0, 0, 0);
    }
}

#[cfg(not(target_os = "linux"))]
fn set_process_title(_title: &str) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shows_flags_follow_format() {
        let cfg = Config {
            format: Some("%t %b".into()),
            ..Config::default()
        };
        let d = Display::new(&cfg);
        assert!(d.shows().timer && d.shows().bytes);
        assert!(!d.shows().rate);
    }

    #[test]
    fn recompile_picks_up_new_format() {
        let mut cfg = Config {
            format: Some("%t".into()),
            ..Config::default()
        };
        let mut d = Display::new(&cfg);
        assert!(d.shows().timer);
        cfg.format = Some("%r".into());
        d.recompile(&cfg);
        assert!(d.shows().rate);
        assert!(!d.shows().timer);
    }

    #[test]
    fn recompile_same_format_same_plan() {
        let cfg = Config {
            format: Some("%b %p".into()),
            ..Config::default()
        };
        let mut d = Display::new(&cfg);
        let before = d.compiled.clone();
        d.recompile(&cfg);
        assert_eq!(before, d.compiled);
    }
}
