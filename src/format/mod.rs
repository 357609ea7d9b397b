//! Display format-string compilation.
//!
//! A format string like `"%N %b %t %r %p %e"` compiles into an ordered
//! list of [`Segment`]s: literal runs and display components, some of
//! a fixed width and some elastic. The compiled form survives until the
//! format string changes; terminal resizes only affect rendering.
//!
//! Syntax: `%` + optional decimal size + single-letter tag, or
//! `%{tag}` / `%{sgr:keywords}`. `%%` is a literal percent sign, and
//! any unrecognised sequence passes through verbatim.

pub mod bar;
pub mod render;
pub mod sgr;

/// Cap for the `%A` (last-written) component width.
pub const MAX_LAST_WRITTEN: usize = 256;
/// Cap for the `%L` (previous-line) component width.
pub const MAX_PREVIOUS_LINE: usize = 1024;
/// `%A` width when no size prefix is given.
pub const DEFAULT_LAST_WRITTEN: usize = 16;
/// `%N` pad width when no size prefix is given.
pub const DEFAULT_NAME_WIDTH: usize = 9;

/// A display component, identified during compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// Bar plus trailing percentage (or rate in gauge mode).
    Progress,
    /// Bar alone, no sides, no trailing number.
    ProgressBarOnly,
    /// Percentage (or rate-vs-max) alone.
    ProgressAmountOnly,
    /// Style-forcing bar variants.
    BarPlain,
    BarBlock,
    BarGranular,
    BarShaded,
    Timer,
    Eta,
    FinEta,
    Rate,
    AverageRate,
    Bytes,
    BufferPercent,
    LastWritten,
    PreviousLine,
    Name,
    /// SGR colour codes; renders empty on terminals without colour.
    Sgr(String),
}

impl Component {
    /// Elastic components absorb the terminal width left over after
    /// the fixed segments are laid out.
    pub fn is_dynamic(&self, chosen_size: Option<usize>) -> bool {
        match self {
            Component::Progress
            | Component::ProgressBarOnly
            | Component::BarPlain
            | Component::BarBlock
            | Component::BarGranular
            | Component::BarShaded => true,
            Component::PreviousLine => chosen_size.is_none(),
            _ => false,
        }
    }
}

/// One compiled element of the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Verbatim text with its visible width cached.
    Literal { text: String, width: usize },
    Component {
        component: Component,
        chosen_size: Option<usize>,
    },
}

/// Which engine-side facts the compiled format needs; collected as a
/// side effect of compilation so the engine can skip bookkeeping for
/// components the display never shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShowFlags {
    pub timer: bool,
    pub bytes: bool,
    pub rate: bool,
    pub average_rate: bool,
    pub eta: bool,
    pub fineta: bool,
    pub progress: bool,
    pub buffer_percent: bool,
    pub name: bool,
    /// Largest requested last-written width; 0 = not shown.
    pub last_written: usize,
    /// Previous-line component present.
    pub previous_line: bool,
}

/// A compiled format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compiled {
    pub segments: Vec<Segment>,
    pub shows: ShowFlags,
    pub dynamic_count: usize,
}

fn letter_component(c: char) -> Option<Component> {
    Some(match c {
        'p' => Component::Progress,
        't' => Component::Timer,
        'e' => Component::Eta,
        'I' => Component::FinEta,
        'r' => Component::Rate,
        'a' => Component::AverageRate,
        'b' => Component::Bytes,
        'T' => Component::BufferPercent,
        'A' => Component::LastWritten,
        'L' => Component::PreviousLine,
        'N' => Component::Name,
        _ => return None,
    })
}

fn brace_component(tag: &str) -> Option<Component> {
    if let Some(spec) = tag.strip_prefix("sgr:") {
        return Some(Component::Sgr(spec.to_string()));
    }
    Some(match tag {
        "progress" => Component::Progress,
        "progress-bar-only" => Component::ProgressBarOnly,
        "progress-amount-only" => Component::ProgressAmountOnly,
        "bar-plain" => Component::BarPlain,
        "bar-block" => Component::BarBlock,
        "bar-granular" => Component::BarGranular,
        "bar-shaded" => Component::BarShaded,
        "timer" => Component::Timer,
        "eta" => Component::Eta,
        "fineta" => Component::FinEta,
        "rate" => Component::Rate,
        "average-rate" => Component::AverageRate,
        "bytes" | "transferred" => Component::Bytes,
        "buffer-percent" => Component::BufferPercent,
        "last-written" => Component::LastWritten,
        "previous-line" => Component::PreviousLine,
        "name" => Component::Name,
        _ => return None,
    })
}

/// Compiles a format string. Compilation never fails: malformed
/// escapes degrade to literal text.
pub fn compile(format: &str) -> Compiled {
    let mut segments: Vec<Segment> = Vec::new();
    let mut lit = String::new();
    let mut shows = ShowFlags::default();

    let flush = |segments: &mut Vec<Segment>, lit: &mut String| {
        if !lit.is_empty() {
            let text = std::mem::take(lit);
            let width = render::visible_width(&text);
            segments.push(Segment::Literal { text, width });
        }
    };

    let mut it = format.chars().peekable();
    while let Some(c) = it.next() {
        if c != '%' {
            lit.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(&d) = it.peek() {
            if d.is_ascii_digit() {
                digits.push(d);
                it.next();
            } else {
                break;
            }
        }
        let chosen: Option<usize> = if digits.is_empty() {
            None
        } else {
            digits.parse().ok()
        };
        match it.peek().copied() {
            // A trailing `%` (with or without digits) is literal.
            None => {
                lit.push('%');
                lit.push_str(&digits);
            }
            Some('%') if digits.is_empty() => {
                it.next();
                lit.push('%');
            }
            Some('{') => {
                it.next();
                let mut tag = String::new();
                let mut closed = false;
                for d in it.by_ref() {
                    if d == '}' {
                        closed = true;
                        break;
                    }
                    tag.push(d);
                }
                match (closed, brace_component(&tag)) {
                    (true, Some(component)) => {
                        flush(&mut segments, &mut lit);
                        push_component(&mut segments, &mut shows, component, chosen);
                    }
                    _ => {
                        // Unknown or unterminated: verbatim.
                        lit.push('%');
                        lit.push_str(&digits);
                        lit.push('{');
                        lit.push_str(&tag);
                        if closed {
                            lit.push('}');
                        }
                    }
                }
            }
            Some(ch) => match letter_component(ch) {
                Some(component) => {
                    it.next();
                    flush(&mut segments, &mut lit);
                    push_component(&mut segments, &mut shows, component, chosen);
                }
                None => {
                    it.next();
                    lit.push('%');
                    lit.push_str(&digits);
                    lit.push(ch);
                }
            },
        }
    }
    flush(&mut segments, &mut lit);

    let dynamic_count = segments
        .iter()
        .filter(|s| match s {
            Segment::Component {
                component,
                chosen_size,
            } => component.is_dynamic(*chosen_size),
            Segment::Literal { .. } => false,
        })
        .count();

    Compiled {
        segments,
        shows,
        dynamic_count,
    }
}

fn push_component(
    segments: &mut Vec<Segment>,
    shows: &mut ShowFlags,
    component: Component,
    chosen: Option<usize>,
) {
    let chosen = match component {
        Component::LastWritten => {
            Some(chosen.unwrap_or(DEFAULT_LAST_WRITTEN).min(MAX_LAST_WRITTEN))
        }
        Component::PreviousLine => chosen.map(|n| n.min(MAX_PREVIOUS_LINE)),
        _ => chosen,
    };
    match &component {
        Component::Timer => shows.timer = true,
        Component::Bytes => shows.bytes = true,
        Component::Rate => shows.rate = true,
        Component::AverageRate => shows.average_rate = true,
        Component::Eta => shows.eta = true,
        Component::FinEta => shows.fineta = true,
        Component::Progress | Component::ProgressAmountOnly => shows.progress = true,
        Component::BufferPercent => shows.buffer_percent = true,
        Component::Name => shows.name = true,
        Component::LastWritten => {
            shows.last_written = shows.last_written.max(chosen.unwrap_or(0));
        }
        Component::PreviousLine => shows.previous_line = true,
        _ => {}
    }
    segments.push(Segment::Component {
        component,
        chosen_size: chosen,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(c: &Compiled) -> Vec<&Component> {
        c.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Component { component, .. } => Some(component),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn compiles_letter_tags() {
        let c = compile("%b %t %r %p %e");
        assert_eq!(
            components(&c),
            vec![
                &Component::Bytes,
                &Component::Timer,
                &Component::Rate,
                &Component::Progress,
                &Component::Eta
            ]
        );
        assert_eq!(c.dynamic_count, 1);
        assert!(c.shows.bytes && c.shows.timer && c.shows.rate);
        assert!(c.shows.progress && c.shows.eta);
    }

    #[test]
    fn literals_between_components() {
        let c = compile("rate: %r done");
        assert_eq!(c.segments.len(), 3);
        assert!(matches!(
            &c.segments[0],
            Segment::Literal { text, width: 6 } if text == "rate: "
        ));
        assert!(matches!(
            &c.segments[2],
            Segment::Literal { text, width: 5 } if text == " done"
        ));
    }

    #[test]
    fn size_prefix_is_captured_and_capped() {
        let c = compile("%12A %2000L");
        assert!(matches!(
            &c.segments[0],
            Segment::Component {
                component: Component::LastWritten,
                chosen_size: Some(12)
            }
        ));
        assert!(matches!(
            &c.segments[2],
            Segment::Component {
                component: Component::PreviousLine,
                chosen_size: Some(MAX_PREVIOUS_LINE)
            }
        ));
        assert_eq!(c.shows.last_written, 12);
    }

    #[test]
    fn bare_last_written_gets_default_width() {
        let c = compile("%A");
        assert!(matches!(
            &c.segments[0],
            Segment::Component {
                component: Component::LastWritten,
                chosen_size: Some(DEFAULT_LAST_WRITTEN)
            }
        ));
    }

    #[test]
    fn previous_line_without_size_is_dynamic() {
        let c = compile("%L");
        assert_eq!(c.dynamic_count, 1);
        let c = compile("%40L");
        assert_eq!(c.dynamic_count, 0);
    }

    #[test]
    fn brace_tags() {
        let c = compile("%{progress} %{average-rate} %{sgr:bold,red}");
        assert_eq!(
            components(&c),
            vec![
                &Component::Progress,
                &Component::AverageRate,
                &Component::Sgr("bold,red".into())
            ]
        );
    }

    #[test]
    fn percent_escape_and_trailing_percent() {
        let c = compile("100%% done%");
        assert_eq!(c.segments.len(), 1);
        assert!(matches!(
            &c.segments[0],
            Segment::Literal { text, .. } if text == "100% done%"
        ));
    }

    #[test]
    fn unknown_sequences_pass_through() {
        let c = compile("%q %5x %{nope} %{unclosed");
        assert_eq!(c.segments.len(), 1);
        assert!(matches!(
            &c.segments[0],
            Segment::Literal { text, .. } if text == "%q %5x %{nope} %{unclosed"
        ));
    }

    #[test]
    fn recompile_is_deterministic() {
        let f = "%N %b %t [%r] %p %e %{sgr:bold} %20L tail";
        assert_eq!(compile(f), compile(f));
    }
}
