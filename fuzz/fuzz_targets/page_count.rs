#![no_main]

use libfuzzer_sys::fuzz_target;
use platen_typst::page_count;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes never panic the scanner.
    let _ = page_count(data);
});
