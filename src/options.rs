//! The control configuration and its parsing helpers.
//!
//! A [`Config`] is built once from the command line, then mutated only
//! by the remote-control receiver. Everything the engine, transfer
//! core, and display need to know about the requested behaviour lives
//! here.

use std::path::PathBuf;

use crate::units::Units;

/// Default display update interval in seconds.
pub const DEFAULT_INTERVAL: f64 = 1.0;
/// Smallest accepted update interval.
pub const MIN_INTERVAL: f64 = 0.1;
/// Largest accepted update interval.
pub const MAX_INTERVAL: f64 = 600.0;
/// Default window for the average-rate estimator, in seconds.
pub const DEFAULT_AVERAGE_WINDOW: f64 = 30.0;
/// Largest width/height a remote peer may set.
pub const MAX_DIMENSION: usize = 999_999;
/// Default width of the `%A` (last-written) component.
pub const DEFAULT_LAST_WRITTEN: usize = 0;

// ---------------------------------------------------------------------------
// Enumerated option values
// ---------------------------------------------------------------------------

/// Progress-bar fill style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarStyle {
    /// `=` filler with a `>` tip.
    #[default]
    Plain,
    /// Full-cell Unicode blocks.
    Block,
    /// Eighth-cell Unicode blocks for sub-cell resolution.
    Granular,
    /// Shaded medium/light blocks.
    Shaded,
}

impl std::str::FromStr for BarStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(BarStyle::Plain),
            "block" => Ok(BarStyle::Block),
            "granular" => Ok(BarStyle::Granular),
            "shaded" => Ok(BarStyle::Shaded),
            other => Err(format!(
                "unknown bar style '{}' (expected plain, block, granular, or shaded)",
                other
            )),
        }
    }
}

/// Extra output destinations beside the terminal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtraDisplay {
    /// Mirror the display into the terminal window title (OSC 2).
    pub window_title: bool,
    /// Mirror the display into the process title.
    pub process_title: bool,
}

impl std::str::FromStr for ExtraDisplay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut extra = ExtraDisplay::default();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part {
                "windowtitle" | "window" => extra.window_title = true,
                "processtitle" | "process" => extra.process_title = true,
                other => {
                    return Err(format!(
                        "unknown extra display '{}' (expected windowtitle or processtitle)",
                        other
                    ));
                }
            }
        }
        Ok(extra)
    }
}

/// Store-and-forward spool location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Spool {
    /// Auto-removed temporary file.
    Temp,
    /// User-named file, kept after the run.
    Path(PathBuf),
}

// ---------------------------------------------------------------------------
// Control config
// ---------------------------------------------------------------------------

/// The complete set of user-controllable knobs.
#[derive(Debug, Clone)]
pub struct Config {
    // Counting and units.
    pub line_mode: bool,
    /// Line delimiter is NUL instead of newline.
    pub null_delimiter: bool,
    pub bits: bool,
    pub si: bool,

    // Cadence.
    pub interval: f64,
    pub delay_start: f64,
    pub average_window: f64,

    // Totals and transfer shaping.
    /// Expected total size in bytes (or lines in line mode); 0 = unknown.
    pub size: u64,
    /// Rate limit in bytes per second; 0 = unlimited.
    pub rate_limit: u64,
    /// Target transfer buffer size; 0 = choose automatically.
    pub buffer_size: usize,
    pub stop_at_size: bool,
    pub sync_after_write: bool,
    pub direct_io: bool,
    pub no_splice: bool,
    pub discard: bool,
    pub store_and_forward: Option<Spool>,
    /// 0 = off, 1 = skip read errors, 2+ = also quiet repeat warnings.
    pub skip_errors: u8,
    /// Fixed skip alignment for read errors; 0 = adaptive.
    pub error_skip_block: u64,

    // Display switches.
    pub show_progress: bool,
    pub show_timer: bool,
    pub show_eta: bool,
    pub show_fineta: bool,
    pub show_rate: bool,
    pub show_average_rate: bool,
    pub show_bytes: bool,
    pub show_buffer_percent: bool,
    /// Width of the `%A` component when enabled from the command line.
    pub last_written_n: usize,

    // Display modes and modifiers.
    pub numeric: bool,
    pub quiet: bool,
    pub wait: bool,
    pub force: bool,
    pub cursor: bool,
    pub rate_gauge: bool,
    pub show_stats: bool,
    pub name: Option<String>,
    pub format: Option<String>,
    pub width: usize,
    pub height: usize,
    pub width_set_manually: bool,
    pub height_set_manually: bool,
    pub bar_style: BarStyle,
    pub extra: ExtraDisplay,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            line_mode: false,
            null_delimiter: false,
            bits: false,
            si: false,
            interval: DEFAULT_INTERVAL,
            delay_start: 0.0,
            average_window: DEFAULT_AVERAGE_WINDOW,
            size: 0,
            rate_limit: 0,
            buffer_size: 0,
            stop_at_size: false,
            sync_after_write: false,
            direct_io: false,
            no_splice: false,
            discard: false,
            store_and_forward: None,
            skip_errors: 0,
            error_skip_block: 0,
            show_progress: false,
            show_timer: false,
            show_eta: false,
            show_fineta: false,
            show_rate: false,
            show_average_rate: false,
            show_bytes: false,
            show_buffer_percent: false,
            last_written_n: DEFAULT_LAST_WRITTEN,
            numeric: false,
            quiet: false,
            wait: false,
            force: false,
            cursor: false,
            rate_gauge: false,
            show_stats: false,
            name: None,
            format: None,
            width: 0,
            height: 0,
            width_set_manually: false,
            height_set_manually: false,
            bar_style: BarStyle::Plain,
            extra: ExtraDisplay::default(),
        }
    }
}

impl Config {
    /// Unit conventions for the formatter.
    pub fn units(&self) -> Units {
        Units {
            si: self.si,
            bits: self.bits,
            line_mode: self.line_mode,
        }
    }

    /// True if any individual display switch was given.
    pub fn any_display_switch(&self) -> bool {
        self.show_progress
            || self.show_timer
            || self.show_eta
            || self.show_fineta
            || self.show_rate
            || self.show_average_rate
            || self.show_bytes
            || self.show_buffer_percent
            || self.last_written_n > 0
    }

    /// Enables the standard display set when the user asked for nothing
    /// specific: progress, timer, ETA, rate, and byte count.
    pub fn apply_display_defaults(&mut self) {
        if self.format.is_none() && !self.any_display_switch() {
            self.show_progress = true;
            self.show_timer = true;
            self.show_eta = true;
            self.show_rate = true;
            self.show_bytes = true;
        }
    }

    /// The format string in effect: the `-F` argument verbatim, or one
    /// assembled from the display switches.
    pub fn effective_format(&self) -> String {
        if let Some(f) = &self.format {
            return f.clone();
        }
        let mut parts: Vec<String> = Vec::new();
        if self.name.is_some() {
            parts.push("%N".into());
        }
        if self.show_bytes {
            parts.push("%b".into());
        }
        if self.show_timer {
            parts.push("%t".into());
        }
        if self.show_rate {
            parts.push("%r".into());
        }
        if self.show_average_rate {
            parts.push("%a".into());
        }
        if self.show_buffer_percent {
            parts.push("%T".into());
        }
        if self.last_written_n > 0 {
            parts.push(format!("%{}A", self.last_written_n));
        }
        if self.show_progress {
            parts.push("%p".into());
        }
        if self.show_eta {
            parts.push("%e".into());
        }
        if self.show_fineta {
            parts.push("%I".into());
        }
        parts.join(" ")
    }
}

// ---------------------------------------------------------------------------
// String parsers (clap value parsers)
// ---------------------------------------------------------------------------

/// Parses a size with an optional K/M/G/T suffix (powers of 1024).
/// `"10M"` → 10 MiB, `"512"` → 512 bytes. A trailing `B` is accepted.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".to_string());
    }
    let upper = s.to_ascii_uppercase();
    let body = upper.strip_suffix('B').unwrap_or(&upper);
    let (num_str, multiplier) = if let Some(num) = body.strip_suffix('K') {
        (num, 1u64 << 10)
    } else if let Some(num) = body.strip_suffix('M') {
        (num, 1u64 << 20)
    } else if let Some(num) = body.strip_suffix('G') {
        (num, 1u64 << 30)
    } else if let Some(num) = body.strip_suffix('T') {
        (num, 1u64 << 40)
    } else {
        (body, 1)
    };
    let num_str = num_str.trim();
    // Allow a fractional mantissa with a suffix ("1.5G").
    if num_str.contains('.') && multiplier > 1 {
        return num_str
            .parse::<f64>()
            .map(|n| (n * multiplier as f64) as u64)
            .map_err(|e| format!("invalid size '{}': {}", s, e));
    }
    num_str
        .parse::<u64>()
        .map(|n| n.saturating_mul(multiplier))
        .map_err(|e| format!("invalid size '{}': {}", s, e))
}

/// Parses a rate limit: same syntax as [`parse_size`], bytes per second.
pub fn parse_rate(s: &str) -> Result<u64, String> {
    parse_size(s)
}

/// Parses an update interval, clamped to the accepted range.
pub fn parse_interval(s: &str) -> Result<f64, String> {
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid interval '{}': {}", s, e))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("invalid interval '{}'", s));
    }
    Ok(v.clamp(MIN_INTERVAL, MAX_INTERVAL))
}

/// Parses a non-negative seconds value (delay-start, average window).
pub fn parse_seconds(s: &str) -> Result<f64, String> {
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", s, e))?;
    if !v.is_finite() || v < 0.0 {
        return Err(format!("invalid duration '{}'", s));
    }
    Ok(v)
}
