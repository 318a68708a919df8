#![no_main]

use libfuzzer_sys::fuzz_target;
use platen_types::TypedValue;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(value) = serde_json::from_str::<TypedValue>(raw) else {
        return;
    };

    // Representation helpers never panic.
    let _ = value.display_string();
    let _ = value.as_number();
    let _ = value.is_empty();

    let serialized = serde_json::to_string(&value).expect("serialize typed value");
    let reparsed: TypedValue = serde_json::from_str(&serialized).expect("reparse typed value");
    assert_eq!(reparsed.value_type(), value.value_type());
});
