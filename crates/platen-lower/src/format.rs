//! Value formatting by token.
//!
//! Injectable nodes and version display configs carry a format token; the
//! token set is closed per value type and unknown tokens fall back to the
//! plain rendering, so a stale config can never fail a render.

use chrono::{DateTime, Utc};
use platen_types::{TypedValue, format_number_plain};

/// Render `value` according to a format token.
pub fn format_value(value: &TypedValue, token: Option<&str>) -> String {
    match value {
        TypedValue::Number(n) => format_number(*n, token),
        TypedValue::Time(t) => format_time(*t, token),
        other => other.display_string(),
    }
}

/// Number tokens: `plain`, `int`, `dec1`, `dec2`, `thousands`,
/// `thousands_dec2`, `percent`.
pub fn format_number(n: f64, token: Option<&str>) -> String {
    match token {
        Some("int") => format!("{}", n.round() as i64),
        Some("dec1") => format!("{n:.1}"),
        Some("dec2") => format!("{n:.2}"),
        Some("thousands") => group_thousands(&format!("{}", n.round() as i64)),
        Some("thousands_dec2") => {
            let formatted = format!("{n:.2}");
            let (int_part, frac) = formatted.split_once('.').unwrap_or((&formatted, "00"));
            format!("{}.{frac}", group_thousands(int_part))
        }
        Some("percent") => format!("{n:.1}%"),
        _ => format_number_plain(n),
    }
}

/// Time tokens: `date` (default), `datetime`, `time`.
pub fn format_time(t: DateTime<Utc>, token: Option<&str>) -> String {
    let pattern = match token {
        Some("datetime") => "%Y-%m-%d %H:%M",
        Some("time") => "%H:%M",
        _ => "%Y-%m-%d",
    };
    t.format(pattern).to_string()
}

fn group_thousands(int_part: &str) -> String {
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}{grouped}")
}
