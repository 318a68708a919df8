#![no_main]

use libfuzzer_sys::fuzz_target;
use platen_content::logic;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return;
    };

    // Parsing either fails cleanly or yields a group whose rule walk and
    // variable collection never panic.
    if let Ok(group) = logic::parse(&value) {
        let mut vars = std::collections::BTreeSet::new();
        group.collect_variables(&mut vars);
        for rule in group.rules() {
            let _ = logic::known_operator(&rule.operator);
        }
    }
});
