#![no_main]

use bridge_config::parse_config_from_str;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert bytes to string, ignore invalid UTF-8
    if let Ok(yaml_str) = std::str::from_utf8(data) {
        // Try to parse the YAML config; we don't care if it fails, only
        // that a malformed config file never panics the daemon at startup.
        let _ = parse_config_from_str(yaml_str);
    }
});
