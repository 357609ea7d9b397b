//! Human-readable quantity formatting for the display and statistics.
//!
//! All pure formatting lives here: byte/line counts, transfer rates,
//! timer and ETA strings. Functions are parameterized by [`Units`] so
//! the renderer does not re-derive the IEC/SI/bits decision per call.

use chrono::{DateTime, Local};

/// Unit conventions selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Units {
    /// Powers of 1000 with `kB`-style suffixes instead of 1024 / `KiB`.
    pub si: bool,
    /// Count bits instead of bytes (amounts are multiplied by 8).
    pub bits: bool,
    /// Counts are lines, not bytes: bare numbers, SI scaling.
    pub line_mode: bool,
}

const IEC_PREFIXES: [&str; 5] = ["", "Ki", "Mi", "Gi", "Ti"];
const SI_PREFIXES: [&str; 5] = ["", "k", "M", "G", "T"];

/// Formats a value to three significant figures, the widest form a
/// scaled quantity can take ("9.77", "97.7", "977").
fn sig3(v: f64) -> String {
    if v >= 100.0 {
        format!("{:.0}", v)
    } else if v >= 10.0 {
        format!("{:.1}", v)
    } else {
        format!("{:.2}", v)
    }
}

/// Formats a cumulative count (bytes, bits, or lines).
///
/// Bytes: `"512B"`, `"9.77KiB"`, `"10.0kB"` under `--si`.
/// Bits:  the amount is shown in bits with a lowercase `b` suffix.
/// Lines: bare count, scaled by powers of 1000 above 1000.
pub fn count(amount: u64, units: Units) -> String {
    if units.line_mode {
        return scaled(amount as f64, 1000.0, &SI_PREFIXES, "");
    }
    let (amount, base) = if units.bits {
        (amount.saturating_mul(8) as f64, "b")
    } else {
        (amount as f64, "B")
    };
    if units.si {
        scaled(amount, 1000.0, &SI_PREFIXES, base)
    } else {
        scaled(amount, 1024.0, &IEC_PREFIXES, base)
    }
}

/// Formats a rate in units per second: `count(...)` plus `"/s"`.
pub fn rate(per_sec: f64, units: Units) -> String {
    let per_sec = per_sec.max(0.0);
    if units.line_mode {
        return format!("{}/s", scaled(per_sec, 1000.0, &SI_PREFIXES, ""));
    }
    let (v, base) = if units.bits {
        (per_sec * 8.0, "b")
    } else {
        (per_sec, "B")
    };
    if units.si {
        format!("{}/s", scaled(v, 1000.0, &SI_PREFIXES, base))
    } else {
        format!("{}/s", scaled(v, 1024.0, &IEC_PREFIXES, base))
    }
}

fn scaled(v: f64, divisor: f64, prefixes: &[&str; 5], base: &str) -> String {
    if v < divisor {
        // Integral below the first scaling threshold.
        return format!("{:.0}{}", v, base);
    }
    let mut v = v;
    let mut idx = 0;
    while v >= divisor && idx < prefixes.len() - 1 {
        v /= divisor;
        idx += 1;
    }
    format!("{}{}{}", sig3(v), prefixes[idx], base)
}

// ---------------------------------------------------------------------------
// Time strings
// ---------------------------------------------------------------------------

/// Formats elapsed seconds as `H:MM:SS`, with a leading day count once
/// past 24 hours (`1:02:03:04`).
pub fn timer(total_secs: f64) -> String {
    let secs = total_secs.max(0.0) as u64;
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    if days > 0 {
        format!("{}:{:02}:{:02}:{:02}", days, h, m, s)
    } else {
        format!("{}:{:02}:{:02}", h, m, s)
    }
}

/// Formats an ETA in seconds as `ETA H:MM:SS`.
pub fn eta(remaining_secs: i64) -> String {
    format!("ETA {}", timer(remaining_secs.max(0) as f64))
}

/// Formats an estimated completion wall-clock time as `FIN HH:MM:SS`,
/// with the date prefixed when the estimate is more than six hours out.
pub fn fineta(now: DateTime<Local>, remaining_secs: i64) -> String {
    let remaining = remaining_secs.max(0);
    let when = now + chrono::Duration::seconds(remaining);
    if remaining > 6 * 3600 {
        format!("FIN {}", when.format("%Y-%m-%d %H:%M:%S"))
    } else {
        format!("FIN {}", when.format("%H:%M:%S"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BYTES: Units = Units {
        si: false,
        bits: false,
        line_mode: false,
    };

    #[test]
    fn count_iec() {
        assert_eq!(count(0, BYTES), "0B");
        assert_eq!(count(512, BYTES), "512B");
        assert_eq!(count(10_000, BYTES), "9.77KiB");
        assert_eq!(count(1_048_576, BYTES), "1.00MiB");
        assert_eq!(count(5 * 1024 * 1024 * 1024, BYTES), "5.00GiB");
    }

    #[test]
    fn count_si() {
        let si = Units { si: true, ..BYTES };
        assert_eq!(count(999, si), "999B");
        assert_eq!(count(10_000, si), "10.0kB");
        assert_eq!(count(1_500_000, si), "1.50MB");
    }

    #[test]
    fn count_bits_multiplies_by_eight() {
        let bits = Units {
            bits: true,
            ..BYTES
        };
        assert_eq!(count(100, bits), "800b");
        assert_eq!(count(10_000, bits), "78.1Kib");
    }

    #[test]
    fn count_lines_is_bare() {
        let lines = Units {
            line_mode: true,
            ..BYTES
        };
        assert_eq!(count(3, lines), "3");
        assert_eq!(count(1_500, lines), "1.50k");
    }

    #[test]
    fn rate_appends_per_second() {
        assert_eq!(rate(500.0, BYTES), "500B/s");
        assert_eq!(rate(2048.0, BYTES), "2.00KiB/s");
        assert_eq!(rate(-1.0, BYTES), "0B/s");
    }

    #[test]
    fn timer_formats() {
        assert_eq!(timer(0.0), "0:00:00");
        assert_eq!(timer(4.9), "0:00:04");
        assert_eq!(timer(3_725.0), "1:02:05");
        assert_eq!(timer(90_061.0), "1:01:01:01");
    }

    #[test]
    fn eta_clamps_negative() {
        assert_eq!(eta(-5), "ETA 0:00:00");
        assert_eq!(eta(65), "ETA 0:01:05");
    }

    #[test]
    fn fineta_adds_date_beyond_six_hours() {
        let now = Local::now();
        assert!(!fineta(now, 60).contains('-'));
        assert!(fineta(now, 7 * 3600).contains('-'));
    }
}
