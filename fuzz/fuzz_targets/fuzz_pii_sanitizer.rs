//! Fuzz target for PII scrubbing.
//!
//! Arbitrary strings must never panic the sanitizer, and metadata
//! scrubbing must agree with plain text scrubbing.

#![no_main]

use gg_telemetry::config::PiiConfig;
use gg_telemetry::security::PiiSanitizer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let config = PiiConfig {
        enabled: true,
        ..Default::default()
    };
    let Ok(sanitizer) = PiiSanitizer::new(&config) else {
        return;
    };

    let matches = sanitizer.detect(data);
    assert_eq!(sanitizer.contains_pii(data), !matches.is_empty());

    let scrubbed = sanitizer.scrub(data);
    if !matches.is_empty() {
        assert_ne!(scrubbed, data, "PII detected but output unchanged");
    }

    let mut map = serde_json::Map::new();
    map.insert("note".into(), serde_json::Value::from(data));
    map.insert("password".into(), serde_json::Value::from(data));
    sanitizer.scrub_map(&mut map);
    assert_eq!(map["note"], serde_json::Value::from(scrubbed));
});
