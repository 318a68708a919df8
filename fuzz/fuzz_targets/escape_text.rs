#![no_main]

use libfuzzer_sys::fuzz_target;
use platen_lower::escape::{SPECIAL, escape_text};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let escaped = escape_text(text);

    // Every special character must be preceded by a backslash.
    let chars: Vec<char> = escaped.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' {
            i += 2;
            continue;
        }
        assert!(!SPECIAL.contains(&chars[i]), "naked special in {escaped:?}");
        i += 1;
    }
});
