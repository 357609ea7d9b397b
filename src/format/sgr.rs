//! SGR keyword mapping for `%{sgr:...}` components.
//!
//! Keywords are comma-separated and map onto ECMA-48 SGR parameter
//! codes. Unknown keywords are dropped; if nothing valid remains the
//! component renders empty.

const KEYWORDS: &[(&str, &str)] = &[
    ("reset", "0"),
    ("none", "0"),
    ("bold", "1"),
    ("dim", "2"),
    ("italic", "3"),
    ("underscore", "4"),
    ("underline", "4"),
    ("blink", "5"),
    ("reverse", "7"),
    ("no-bold", "22"),
    ("no-dim", "22"),
    ("no-italic", "23"),
    ("no-underscore", "24"),
    ("no-underline", "24"),
    ("no-blink", "25"),
    ("no-reverse", "27"),
    ("black", "30"),
    ("red", "31"),
    ("green", "32"),
    ("brown", "33"),
    ("yellow", "33"),
    ("blue", "34"),
    ("magenta", "35"),
    ("cyan", "36"),
    ("white", "37"),
    ("fg-default", "39"),
    ("bg-black", "40"),
    ("bg-red", "41"),
    ("bg-green", "42"),
    ("bg-brown", "43"),
    ("bg-yellow", "43"),
    ("bg-blue", "44"),
    ("bg-magenta", "45"),
    ("bg-cyan", "46"),
    ("bg-white", "47"),
    ("bg-default", "49"),
];

/// Renders an SGR keyword list into an escape sequence, or an empty
/// string when no keyword is recognised.
pub fn render(spec: &str) -> String {
    let codes: Vec<&str> = spec
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .filter_map(|k| {
            KEYWORDS
                .iter()
                .find(|(name, _)| *name == k)
                .map(|(_, code)| *code)
        })
        .collect();
    if codes.is_empty() {
        return String::new();
    }
    format!("\x1b[{}m", codes.join(";"))
}
