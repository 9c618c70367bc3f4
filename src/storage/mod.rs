//! Storage provider abstraction.
//!
//! Every backend implements [`StorageProvider`]. Providers know nothing
//! about plugins; [`PluginAwareStorage`] decorates any of them with the
//! storage and query hooks.

mod error;
mod memory;
mod plugin_aware;
mod registry;

pub use error::StorageError;
pub use memory::InMemoryStorage;
pub use plugin_aware::PluginAwareStorage;
pub use registry::{StorageFactory, StorageRegistry};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{QueryFilter, TelemetryEvent};

/// Point-in-time statistics reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub provider: String,
    pub total_events: u64,
    pub sessions: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

/// Contract every storage backend implements.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports_query(&self) -> bool {
        false
    }

    fn supports_batch(&self) -> bool {
        false
    }

    async fn initialize(&self) -> Result<(), StorageError>;

    async fn store(&self, event: &TelemetryEvent) -> Result<(), StorageError>;

    /// Store several events. Providers without native batching store them
    /// one by one and stop at the first failure.
    async fn store_batch(&self, events: &[TelemetryEvent]) -> Result<(), StorageError> {
        for event in events {
            self.store(event).await?;
        }
        Ok(())
    }

    async fn query(&self, _filter: &QueryFilter) -> Result<Vec<TelemetryEvent>, StorageError> {
        Err(StorageError::QueryNotSupported(self.name().to_string()))
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError>;

    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn compact(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Remove records older than `before`, returning how many were removed.
    async fn clean(&self, before: DateTime<Utc>) -> Result<usize, StorageError>;

    async fn shutdown(&self) -> Result<(), StorageError>;
}
