//! Text escaping for Typst markup.

/// Characters with markup meaning in body text.
pub const SPECIAL: &[char] = &['\\', '#', '*', '_', '@', '$', '<', '>', '[', ']'];

/// Backslash-escape every markup-significant character.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape `s` for use inside a double-quoted Typst string literal, as in
/// `#raw("…")` or `#image("…")`. Body-text escaping does not apply here;
/// code spans receive the literal text.
pub fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
