//! Export of event sets into interchange formats.

mod csv;
mod json;

pub use self::csv::CsvExporter;
pub use self::json::JsonExporter;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::TelemetryEvent;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unknown export format: {0}")]
    UnknownFormat(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Renders a set of events in one format.
pub trait Exporter: Send + Sync {
    fn format(&self) -> &str;

    fn content_type(&self) -> &str;

    fn export(&self, events: &[TelemetryEvent]) -> Result<String, ExportError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub total_events: usize,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub success: bool,
    pub format: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExportMetadata>,
}

impl ExportResult {
    pub fn new(format: impl Into<String>, data: String, total_events: usize) -> Self {
        Self {
            success: true,
            format: format.into(),
            data,
            metadata: Some(ExportMetadata {
                total_events,
                exported_at: Utc::now(),
            }),
        }
    }

    pub fn total_events(&self) -> usize {
        self.metadata.as_ref().map_or(0, |m| m.total_events)
    }
}

/// Format name to exporter mapping.
#[derive(Clone)]
pub struct ExporterRegistry {
    exporters: HashMap<String, Arc<dyn Exporter>>,
}

impl ExporterRegistry {
    /// A registry with the built-in `json` and `csv` exporters.
    pub fn new() -> Self {
        let mut registry = Self {
            exporters: HashMap::new(),
        };
        registry.register(Arc::new(JsonExporter));
        registry.register(Arc::new(CsvExporter));
        registry
    }

    /// Add an exporter, replacing any existing one for the same format.
    pub fn register(&mut self, exporter: Arc<dyn Exporter>) {
        self.exporters
            .insert(exporter.format().to_ascii_lowercase(), exporter);
    }

    pub fn get(&self, format: &str) -> Result<Arc<dyn Exporter>, ExportError> {
        self.exporters
            .get(&format.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ExportError::UnknownFormat(format.to_string()))
    }

    pub fn formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.exporters.keys().cloned().collect();
        formats.sort();
        formats
    }
}

impl Default for ExporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
