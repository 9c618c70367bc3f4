//! Fuzz target for query filter parsing.
//!
//! Arbitrary JSON must either parse into a filter that validates, or be
//! rejected, never panic.

#![no_main]

use gg_telemetry::event::QueryFilter;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Ok(filter) = QueryFilter::from_json(&value) {
        assert!(filter.validate().is_ok(), "parsed filter failed validation");
        let _ = filter.apply(Vec::new());
    }
});
