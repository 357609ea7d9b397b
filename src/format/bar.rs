//! Progress-bar geometry and fill styles.
//!
//! Three shapes share this code: the full progress component (sides,
//! fill, trailing amount), the bar-only component, and the
//! amount-only component. With an unknown size and no rate gauge the
//! fill is replaced by a bouncing `<=>` indicator.

use crate::options::BarStyle;
use crate::units::{self, Units};

/// Eighth-cell fills, shortest first.
const GRANULAR: [char; 7] = ['▏', '▎', '▍', '▌', '▋', '▊', '▉'];

/// Everything the bar needs to know about the transfer.
#[derive(Debug, Clone, Copy)]
pub struct BarParams {
    /// Completion percentage, or the 0..200 sweep when size is unknown.
    pub percentage: f64,
    pub size_known: bool,
    /// Show current rate against the maximum seen instead of progress.
    pub gauge: bool,
    pub rate: f64,
    pub max_rate: f64,
    pub units: Units,
    pub style: BarStyle,
}

/// The trailing amount: ` NNN%` with a known size, ` NNNuB/s` in gauge
/// mode, nothing otherwise.
pub fn amount(p: &BarParams) -> String {
    if p.gauge {
        format!(" {}", units::rate(p.rate, p.units))
    } else if p.size_known {
        format!(" {:>3}%", p.percentage.max(0.0) as u64)
    } else {
        String::new()
    }
}

/// Renders the bar into exactly `width` display columns (ASCII and
/// single-cell runes only).
pub fn render(width: usize, p: &BarParams, with_sides: bool, with_amount: bool) -> String {
    let amount_str = if with_amount { amount(p) } else { String::new() };
    let overhead = amount_str.chars().count() + if with_sides { 2 } else { 0 };
    let bar_width = width.saturating_sub(overhead);

    let body = if p.size_known || p.gauge {
        let frac = if p.gauge {
            if p.max_rate > 0.0 {
                (p.rate / p.max_rate).clamp(0.0, 1.0)
            } else {
                0.0
            }
        } else {
            (p.percentage / 100.0).clamp(0.0, 1.0)
        };
        fill(bar_width, frac, p.style)
    } else {
        oscillator(bar_width, p.percentage)
    };

    let mut out = String::with_capacity(width + 8);
    if with_sides {
        out.push('[');
    }
    out.push_str(&body);
    if with_sides {
        out.push(']');
    }
    out.push_str(&amount_str);
    out
}

/// Fills `bar_width` cells to `frac`, per style. Fractional cells
/// always round down; the plain tip is omitted at 100%.
fn fill(bar_width: usize, frac: f64, style: BarStyle) -> String {
    if bar_width == 0 {
        return String::new();
    }
    let mut out = String::with_capacity(bar_width * 3);
    match style {
        BarStyle::Plain => {
            let filled = (bar_width as f64 * frac) as usize;
            if filled >= bar_width {
                out.extend(std::iter::repeat_n('=', bar_width));
            } else if filled > 0 {
                out.extend(std::iter::repeat_n('=', filled - 1));
                out.push('>');
                out.extend(std::iter::repeat_n(' ', bar_width - filled));
            } else {
                out.extend(std::iter::repeat_n(' ', bar_width));
            }
        }
        BarStyle::Block => {
            let filled = (bar_width as f64 * frac) as usize;
            out.extend(std::iter::repeat_n('█', filled));
            out.extend(std::iter::repeat_n(' ', bar_width - filled));
        }
        BarStyle::Granular => {
            let eighths = (bar_width as f64 * 8.0 * frac) as usize;
            let full = (eighths / 8).min(bar_width);
            let rem = eighths % 8;
            out.extend(std::iter::repeat_n('█', full));
            let mut used = full;
            if rem > 0 && used < bar_width {
                out.push(GRANULAR[rem - 1]);
                used += 1;
            }
            out.extend(std::iter::repeat_n(' ', bar_width - used));
        }
        BarStyle::Shaded => {
            let filled = (bar_width as f64 * frac) as usize;
            out.extend(std::iter::repeat_n('▓', filled));
            out.extend(std::iter::repeat_n('░', bar_width - filled));
        }
    }
    out
}

/// The unknown-size indicator: a 3-cell `<=>` bouncing across the bar.
/// `sweep` runs 0..200 and folds at 100 so the bounce reverses.
fn oscillator(bar_width: usize, sweep: f64) -> String {
    if bar_width < 3 {
        return " ".repeat(bar_width);
    }
    let pos_pct = if sweep > 100.0 { 200.0 - sweep } else { sweep };
    let track = bar_width - 3;
    let pos = ((track as f64 * pos_pct / 100.0) as usize).min(track);
    let mut out = String::with_capacity(bar_width);
    out.extend(std::iter::repeat_n(' ', pos));
    out.push_str("<=>");
    out.extend(std::iter::repeat_n(' ', track - pos));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Units;

    fn params(pct: f64) -> BarParams {
        BarParams {
            percentage: pct,
            size_known: true,
            gauge: false,
            rate: 0.0,
            max_rate: 0.0,
            units: Units::default(),
            style: BarStyle::Plain,
        }
    }

    #[test]
    fn plain_half_full_has_tip() {
        let s = render(20, &params(50.0), true, true);
        assert!(s.starts_with('['));
        assert!(s.ends_with("  50%"));
        assert!(s.contains('>'));
        let inner = &s[1..s.find(']').unwrap()];
        assert_eq!(inner.chars().count(), 20 - 2 - 5);
        assert!(inner.trim_end().ends_with('>'));
    }

    #[test]
    fn plain_tip_omitted_at_completion() {
        let s = render(20, &params(100.0), true, true);
        assert!(!s.contains('>'));
        assert!(s.ends_with(" 100%"));
        let inner = &s[1..s.find(']').unwrap()];
        assert!(inner.chars().all(|c| c == '='));
    }

    #[test]
    fn empty_bar_at_zero() {
        let s = render(20, &params(0.0), true, true);
        let inner = &s[1..s.find(']').unwrap()];
        assert!(inner.chars().all(|c| c == ' '));
    }

    #[test]
    fn width_is_respected_across_styles() {
        for style in [
            BarStyle::Plain,
            BarStyle::Block,
            BarStyle::Granular,
            BarStyle::Shaded,
        ] {
            for pct in [0.0, 33.0, 66.0, 100.0] {
                let p = BarParams {
                    style,
                    ..params(pct)
                };
                let s = render(30, &p, true, true);
                assert_eq!(s.chars().count(), 30, "style {:?} pct {}", style, pct);
            }
        }
    }

    #[test]
    fn oscillator_bounces_within_track() {
        for sweep in [0.0, 50.0, 100.0, 150.0, 198.0] {
            let p = BarParams {
                size_known: false,
                ..params(sweep)
            };
            let s = render(20, &p, true, true);
            assert_eq!(s.chars().count(), 20);
            assert!(s.contains("<=>"), "sweep {}", sweep);
        }
        // Folded sweep positions mirror: 150 matches 50.
        let a = render(20, &BarParams { size_known: false, ..params(50.0) }, true, false);
        let b = render(20, &BarParams { size_known: false, ..params(150.0) }, true, false);
        assert_eq!(a, b);
    }

    #[test]
    fn gauge_shows_rate_fraction() {
        let p = BarParams {
            size_known: false,
            gauge: true,
            rate: 50.0,
            max_rate: 100.0,
            ..params(0.0)
        };
        let s = render(30, &p, true, true);
        assert!(s.ends_with("50B/s"), "{}", s);
        assert!(s.contains('>'));
    }

    #[test]
    fn bar_only_has_no_amount_or_sides() {
        let s = render(10, &params(50.0), false, false);
        assert_eq!(s.chars().count(), 10);
        assert!(!s.contains('[') && !s.contains('%'));
    }
}
