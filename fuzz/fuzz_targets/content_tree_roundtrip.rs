#![no_main]

use libfuzzer_sys::fuzz_target;
use platen_content::{parse_document, referenced_variables, to_json, validate_structure};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(tree) = parse_document(raw) else {
        return;
    };

    // Validation and variable collection never panic on parseable input.
    let _ = validate_structure(&tree);
    let _ = referenced_variables(&tree);

    // Serialization is deterministic: serialize → parse → serialize is a
    // fixed point.
    let first = to_json(&tree).expect("serialize parsed tree");
    let reparsed = parse_document(&first).expect("reparse serialized tree");
    let second = to_json(&reparsed).expect("serialize reparsed tree");
    assert_eq!(first, second);
});
