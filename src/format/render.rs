//! The two-pass display renderer.
//!
//! Pass one renders every fixed-width segment and totals their visible
//! widths; pass two divides the leftover terminal columns evenly among
//! the dynamic segments and renders those. Visible width is measured
//! in display columns, with escape sequences counting for nothing.

use chrono::{DateTime, Local};
use unicode_width::UnicodeWidthChar;

use crate::options::BarStyle;
use crate::units::{self, Units};

use super::bar::{self, BarParams};
use super::{Compiled, Component, DEFAULT_NAME_WIDTH, Segment, sgr};

/// Everything the renderer reads about the transfer; assembled by the
/// display driver once per paint.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub units: Units,
    pub elapsed: f64,
    pub rate: f64,
    pub avg_rate: f64,
    /// Highest rate seen, in the same per-second unit as `rate`.
    pub max_rate: f64,
    /// Completion percentage, or the 0..200 sweep when size is unknown.
    pub percentage: f64,
    /// Count the consumer has actually received.
    pub transferred: u64,
    pub size: u64,
    pub eta_secs: Option<i64>,
    pub final_update: bool,
    pub gauge: bool,
    /// `None` while the zero-copy path is active.
    pub buffer_percent: Option<u64>,
    pub last_written: &'a [u8],
    pub previous_line: &'a [u8],
    pub name: Option<&'a str>,
    pub bar_style: BarStyle,
    pub colors: bool,
    pub now: DateTime<Local>,
}

/// Display columns occupied by `s`, with CSI and OSC escape sequences
/// counting zero.
pub fn visible_width(s: &str) -> usize {
    let mut width = 0;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    while let Some(&d) = chars.peek() {
                        chars.next();
                        if ('\x40'..='\x7e').contains(&d) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    while let Some(d) = chars.next() {
                        if d == '\x07' {
                            break;
                        }
                        if d == '\x1b' {
                            chars.next_if(|&e| e == '\\');
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else {
            width += UnicodeWidthChar::width(c).unwrap_or(0);
        }
    }
    width
}

fn bar_params(ctx: &RenderContext<'_>) -> BarParams {
    BarParams {
        percentage: ctx.percentage,
        size_known: ctx.size > 0,
        gauge: ctx.gauge,
        rate: ctx.rate,
        max_rate: ctx.max_rate,
        units: ctx.units,
        style: ctx.bar_style,
    }
}

/// Bytes as printable text: graphic ASCII passes, everything else
/// becomes `replacement`.
fn printable(bytes: &[u8], replacement: char) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                replacement
            }
        })
        .collect()
}

fn render_fixed(component: &Component, chosen: Option<usize>, ctx: &RenderContext<'_>) -> String {
    match component {
        Component::Timer => units::timer(ctx.elapsed),
        Component::Eta => {
            if ctx.size == 0 || ctx.final_update {
                String::new()
            } else {
                units::eta(ctx.eta_secs.unwrap_or(0))
            }
        }
        Component::FinEta => match (ctx.size, ctx.eta_secs) {
            (0, _) | (_, None) => String::new(),
            (_, Some(eta)) => {
                let remaining = if ctx.final_update { 0 } else { eta };
                units::fineta(ctx.now, remaining)
            }
        },
        Component::Rate => format!("[{:>9}]", units::rate(ctx.rate, ctx.units)),
        Component::AverageRate => format!("({:>9})", units::rate(ctx.avg_rate, ctx.units)),
        Component::Bytes => format!("{:>9}", units::count(ctx.transferred, ctx.units)),
        Component::BufferPercent => match ctx.buffer_percent {
            Some(p) => format!("{{{:>3}%}}", p),
            None => "{----}".to_string(),
        },
        Component::LastWritten => {
            let n = chosen.unwrap_or(0);
            let tail = ctx.last_written;
            let take = tail.len().min(n);
            let text = printable(&tail[tail.len() - take..], '.');
            format!("{:>n$}", text)
        }
        Component::PreviousLine => {
            let n = chosen.unwrap_or(0);
            let take = ctx.previous_line.len().min(n);
            let text = printable(&ctx.previous_line[..take], ' ');
            format!("{:<n$}", text)
        }
        Component::Name => {
            let w = chosen.unwrap_or(DEFAULT_NAME_WIDTH);
            let name = ctx.name.unwrap_or("");
            let name: String = name.chars().take(w).collect();
            format!("{:>w$}:", name)
        }
        Component::Sgr(spec) => {
            if ctx.colors {
                sgr::render(spec)
            } else {
                String::new()
            }
        }
        Component::ProgressAmountOnly => bar::amount(&bar_params(ctx)).trim_start().to_string(),
        // Dynamic components never reach here.
        _ => String::new(),
    }
}

fn render_dynamic(component: &Component, width: usize, ctx: &RenderContext<'_>) -> String {
    let p = bar_params(ctx);
    match component {
        Component::Progress => bar::render(width, &p, true, true),
        Component::ProgressBarOnly => bar::render(width, &p, false, false),
        Component::BarPlain => styled(width, p, BarStyle::Plain),
        Component::BarBlock => styled(width, p, BarStyle::Block),
        Component::BarGranular => styled(width, p, BarStyle::Granular),
        Component::BarShaded => styled(width, p, BarStyle::Shaded),
        Component::PreviousLine => {
            let take = ctx.previous_line.len().min(width);
            let text = printable(&ctx.previous_line[..take], ' ');
            format!("{:<width$}", text)
        }
        _ => String::new(),
    }
}

fn styled(width: usize, mut p: BarParams, style: BarStyle) -> String {
    p.style = style;
    bar::render(width, &p, true, false)
}

/// Paints the compiled format into a single line no wider than
/// `terminal_width` columns.
pub fn render(compiled: &Compiled, ctx: &RenderContext<'_>, terminal_width: usize) -> String {
    enum Piece<'s> {
        Fixed(String),
        Dynamic(&'s Component),
    }

    let mut pieces = Vec::with_capacity(compiled.segments.len());
    let mut static_width = 0usize;
    for seg in &compiled.segments {
        match seg {
            Segment::Literal { text, width } => {
                static_width += width;
                pieces.push(Piece::Fixed(text.clone()));
            }
            Segment::Component {
                component,
                chosen_size,
            } => {
                if component.is_dynamic(*chosen_size) {
                    pieces.push(Piece::Dynamic(component));
                } else {
                    let s = render_fixed(component, *chosen_size, ctx);
                    static_width += visible_width(&s);
                    pieces.push(Piece::Fixed(s));
                }
            }
        }
    }

    let share = if compiled.dynamic_count > 0 {
        terminal_width.saturating_sub(static_width) / compiled.dynamic_count
    } else {
        0
    };

    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Fixed(s) => out.push_str(&s),
            Piece::Dynamic(component) => out.push_str(&render_dynamic(component, share, ctx)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::compile;

    fn ctx<'a>() -> RenderContext<'a> {
        RenderContext {
            units: Units::default(),
            elapsed: 4.0,
            rate: 100.0,
            avg_rate: 100.0,
            max_rate: 100.0,
            percentage: 50.0,
            transferred: 500,
            size: 1000,
            eta_secs: Some(5),
            final_update: false,
            gauge: false,
            buffer_percent: Some(12),
            last_written: b"tail",
            previous_line: b"prev",
            name: None,
            bar_style: BarStyle::Plain,
            colors: true,
            now: Local::now(),
        }
    }

    #[test]
    fn visible_width_ignores_escapes() {
        assert_eq!(visible_width("abc"), 3);
        assert_eq!(visible_width("\x1b[1;31mabc\x1b[0m"), 3);
        assert_eq!(visible_width("\x1b]2;title\x1b\\x"), 1);
        assert_eq!(visible_width("日本"), 4);
    }

    #[test]
    fn composed_line_matches_expected_shape() {
        let compiled = compile("%b %t %r %p %e");
        let line = render(&compiled, &ctx(), 80);
        assert!(line.contains("500B"));
        assert!(line.contains("0:00:04"));
        assert!(line.contains("[     100B/s]"));
        assert!(line.contains("ETA 0:00:05"));
        assert!(line.contains("50%"));
        assert!(line.contains('>'));
    }

    #[test]
    fn width_discipline_holds() {
        let compiled = compile("%N %b %t %r %a %p %e %I");
        for width in [40usize, 60, 80, 120] {
            let line = render(&compiled, &ctx(), width);
            assert!(
                visible_width(&line) <= width,
                "width {} line {:?}",
                width,
                line
            );
        }
    }

    #[test]
    fn two_dynamics_share_remaining_space() {
        let compiled = compile("%p%{progress-bar-only}");
        assert_eq!(compiled.dynamic_count, 2);
        let line = render(&compiled, &ctx(), 60);
        assert!(visible_width(&line) <= 60);
        assert!(visible_width(&line) >= 55);
    }

    #[test]
    fn eta_blank_on_final_and_unknown_size() {
        let compiled = compile("%e");
        let mut c = ctx();
        c.final_update = true;
        assert_eq!(render(&compiled, &c, 80), "");
        let mut c = ctx();
        c.size = 0;
        assert_eq!(render(&compiled, &c, 80), "");
    }

    #[test]
    fn buffer_percent_shows_dashes_when_splicing() {
        let compiled = compile("%T");
        let mut c = ctx();
        assert_eq!(render(&compiled, &c, 80), "{ 12%}");
        c.buffer_percent = None;
        assert_eq!(render(&compiled, &c, 80), "{----}");
    }

    #[test]
    fn sgr_respects_color_support() {
        let compiled = compile("%{sgr:bold}x");
        let mut c = ctx();
        assert_eq!(render(&compiled, &c, 80), "\x1b[1mx");
        c.colors = false;
        assert_eq!(render(&compiled, &c, 80), "x");
    }

    #[test]
    fn last_written_pads_and_sanitizes() {
        let compiled = compile("%8A");
        let mut c = ctx();
        c.last_written = b"ab\x01cd";
        assert_eq!(render(&compiled, &c, 80), "   ab.cd");
    }

    #[test]
    fn previous_line_fixed_width() {
        let compiled = compile("%8L");
        let line = render(&compiled, &ctx(), 80);
        assert_eq!(line, "prev    ");
    }

    #[test]
    fn name_is_padded_to_nine() {
        let compiled = compile("%N");
        let mut c = ctx();
        c.name = Some("copy");
        assert_eq!(render(&compiled, &c, 80), "     copy:");
    }

    #[test]
    fn unknown_size_oscillates() {
        let compiled = compile("%p");
        let mut c = ctx();
        c.size = 0;
        c.percentage = 40.0;
        let line = render(&compiled, &c, 40);
        assert!(line.contains("<=>"));
        assert!(!line.contains('%'));
    }
}
