//! CSV export with RFC 4180 quoting.

use super::{ExportError, Exporter};
use crate::event::TelemetryEvent;

pub const CSV_HEADER: &str = "id,sessionId,eventType,category,action,label,value,duration,timestamp";

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExporter;

impl Exporter for CsvExporter {
    fn format(&self) -> &str {
        "csv"
    }

    fn content_type(&self) -> &str {
        "text/csv"
    }

    fn export(&self, events: &[TelemetryEvent]) -> Result<String, ExportError> {
        let mut out = String::with_capacity(CSV_HEADER.len() + events.len() * 128);
        out.push_str(CSV_HEADER);
        out.push_str("\r\n");
        for e in events {
            let fields = [
                escape(&e.id),
                escape(&e.session_id),
                e.event_type.as_str().to_string(),
                escape(&e.category),
                escape(&e.action),
                e.label.as_deref().map(escape).unwrap_or_default(),
                e.value.map(|v| v.to_string()).unwrap_or_default(),
                e.duration.map(|v| v.to_string()).unwrap_or_default(),
                e.timestamp.to_rfc3339(),
            ];
            out.push_str(&fields.join(","));
            out.push_str("\r\n");
        }
        Ok(out)
    }
}

/// Quote a field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
