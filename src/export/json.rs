use super::{ExportError, Exporter};
use crate::event::TelemetryEvent;

/// Pretty-printed JSON array of events.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format(&self) -> &str {
        "json"
    }

    fn content_type(&self) -> &str {
        "application/json"
    }

    fn export(&self, events: &[TelemetryEvent]) -> Result<String, ExportError> {
        serde_json::to_string_pretty(events).map_err(|e| ExportError::Serialization(e.to_string()))
    }
}
