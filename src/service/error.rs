//! Service-level errors.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::analytics::AnalyticsError;
use crate::config::ConfigError;
use crate::event::FilterError;
use crate::export::ExportError;
use crate::plugin::{HookError, PluginError};
use crate::security::SecurityError;
use crate::storage::StorageError;

/// One provider's share of a failed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub message: String,
    /// Whether the provider error is worth retrying.
    #[serde(skip)]
    pub retryable: bool,
}

impl ProviderFailure {
    pub fn new(provider: impl Into<String>, error: &StorageError) -> Self {
        Self {
            provider: provider.into(),
            message: error.to_string(),
            retryable: !error.is_capability_error(),
        }
    }
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.message)
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry service not initialized")]
    NotInitialized,

    #[error("no storage providers could be initialized")]
    NoStorageProviders,

    #[error("required plugins not registered: {}", .0.join(", "))]
    MissingPlugins(Vec<String>),

    #[error("event rejected by plugin {plugin}")]
    Rejected { plugin: String },

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("all storage providers failed: {}", join(.failures))]
    StorageFailed { failures: Vec<ProviderFailure> },

    #[error("telemetry service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plugin(PluginError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    InvalidFilter(#[from] FilterError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<PluginError> for TelemetryError {
    fn from(e: PluginError) -> Self {
        match e {
            PluginError::Rejected { plugin } => Self::Rejected { plugin },
            PluginError::Hook(e) => Self::Hook(e),
            other => Self::Plugin(other),
        }
    }
}

impl TelemetryError {
    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::StorageFailed { failures } => failures.iter().any(|f| f.retryable),
            Self::Storage(e) => !e.is_capability_error(),
            Self::Hook(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Requests the pipeline can never satisfy: unknown formats or storage
    /// types, queries against providers without query support, bad filters.
    pub fn is_capability_error(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_capability_error(),
            Self::Export(ExportError::UnknownFormat(_)) => true,
            Self::Analytics(AnalyticsError::UnknownOperation(_)) => true,
            Self::InvalidFilter(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failed_lists_every_provider() {
        let err = TelemetryError::StorageFailed {
            failures: vec![
                ProviderFailure::new("a", &StorageError::backend("a", "disk full")),
                ProviderFailure::new("b", &StorageError::CircuitOpen("b".into())),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("disk full"));
        assert!(message.contains("circuit open for storage provider b"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejection_keeps_plugin_name() {
        let err: TelemetryError = PluginError::Rejected {
            plugin: "gate".into(),
        }
        .into();
        assert!(matches!(&err, TelemetryError::Rejected { plugin } if plugin == "gate"));
        assert_eq!(err.to_string(), "event rejected by plugin gate");
    }

    #[test]
    fn test_classification() {
        assert!(TelemetryError::Export(ExportError::UnknownFormat("xml".into())).is_capability_error());
        assert!(TelemetryError::Storage(StorageError::UnknownType("sqlite".into())).is_capability_error());
        assert!(!TelemetryError::NotInitialized.is_retryable());
        assert!(TelemetryError::RateLimited { retry_after_ms: 10 }.is_retryable());
    }
}
