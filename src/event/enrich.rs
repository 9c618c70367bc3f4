//! Enrichment: fill defaults on caller-supplied events.

use chrono::Utc;
use uuid::Uuid;

use super::model::{EventContext, NewEvent, TelemetryEvent};

/// Category and action used when the caller omits them.
pub const UNKNOWN: &str = "unknown";

/// Enrich a caller-supplied event into a complete record.
///
/// Missing ids are generated as UUID v4, the timestamp defaults to the
/// current wall clock, and the event context is merged over `defaults`.
/// Blank strings count as missing.
pub fn enrich(input: NewEvent, defaults: &EventContext) -> TelemetryEvent {
    TelemetryEvent {
        id: non_empty(input.id).unwrap_or_else(new_id),
        session_id: non_empty(input.session_id).unwrap_or_else(new_id),
        event_type: input.event_type.unwrap_or_default(),
        category: non_empty(input.category).unwrap_or_else(|| UNKNOWN.to_string()),
        action: non_empty(input.action).unwrap_or_else(|| UNKNOWN.to_string()),
        label: input.label,
        value: input.value,
        duration: input.duration,
        timestamp: input.timestamp.unwrap_or_else(Utc::now),
        metadata: input.metadata,
        context: input.context.merged_over(defaults),
    }
}

/// Generate a fresh opaque identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Service-level context: explicit `overrides` first, then the service
/// environment and version, then the host platform and hostname.
pub fn service_context(environment: &str, version: &str, overrides: &EventContext) -> EventContext {
    let host = EventContext {
        environment: Some(environment.to_string()),
        version: Some(version.to_string()),
        platform: Some(std::env::consts::OS.to_string()),
        hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
        ..Default::default()
    };
    overrides.clone().merged_over(&host)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
