#![no_main]

use libfuzzer_sys::fuzz_target;
use platen_config::Config;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Any TOML input either fails to parse or produces a config whose
    // accessors are total.
    if let Ok(config) = toml::from_str::<Config>(raw) {
        let _ = config.render_timeout();
        let _ = config.admission_timeout();
        let _ = config.scheduler_interval();
        let _ = config.image_cache_max_age();
    }
});
