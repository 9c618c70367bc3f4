//! Decorates a provider with storage and query hooks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{StorageError, StorageProvider, StorageStats};
use crate::event::{QueryFilter, TelemetryEvent};
use crate::plugin::{names, DeleteReport, HookCategory, PluginManager, QueryFailure, StorageFailure, StoreReport};

/// Wraps a provider so that every write, query and retention cleanup runs
/// the plugins' hooks around it. The wrapped provider stays hook-unaware.
pub struct PluginAwareStorage {
    inner: Arc<dyn StorageProvider>,
    plugins: Arc<PluginManager>,
}

impl PluginAwareStorage {
    pub fn new(inner: Arc<dyn StorageProvider>, plugins: Arc<PluginManager>) -> Self {
        Self { inner, plugins }
    }

    pub fn inner(&self) -> &Arc<dyn StorageProvider> {
        &self.inner
    }

    fn metadata(&self, operation: &str) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("provider".into(), Value::from(self.inner.name()));
        metadata.insert("operation".into(), Value::from(operation));
        metadata
    }

    async fn store_events(&self, events: Vec<TelemetryEvent>) -> Result<(), StorageError> {
        let metadata = self.metadata("store");
        let events = self
            .plugins
            .chain(HookCategory::Storage, names::BEFORE_STORE, events, metadata.clone())
            .await?;
        if events.is_empty() {
            tracing::debug!(provider = %self.inner.name(), "write filtered out by beforeStore");
            return Ok(());
        }

        let result = match events.as_slice() {
            [event] => self.inner.store(event).await,
            batch => self.inner.store_batch(batch).await,
        };

        match result {
            Ok(()) => {
                let report = StoreReport {
                    stored: events.len(),
                    events,
                };
                self.plugins
                    .execute_storage_hooks::<StoreReport, ()>(names::AFTER_STORE, report, metadata)
                    .await?;
                Ok(())
            }
            Err(e) => {
                let failure = StorageFailure {
                    error: e.to_string(),
                    events,
                };
                if let Err(hook_err) = self
                    .plugins
                    .execute_storage_hooks::<StorageFailure, ()>(names::ON_STORAGE_ERROR, failure, metadata)
                    .await
                {
                    tracing::warn!(error = %hook_err, "onStorageError hook failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait::async_trait]
impl StorageProvider for PluginAwareStorage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_query(&self) -> bool {
        self.inner.supports_query()
    }

    fn supports_batch(&self) -> bool {
        self.inner.supports_batch()
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        self.inner.initialize().await
    }

    async fn store(&self, event: &TelemetryEvent) -> Result<(), StorageError> {
        self.store_events(vec![event.clone()]).await
    }

    async fn store_batch(&self, events: &[TelemetryEvent]) -> Result<(), StorageError> {
        self.store_events(events.to_vec()).await
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<TelemetryEvent>, StorageError> {
        if !self.inner.supports_query() {
            return Err(StorageError::QueryNotSupported(self.inner.name().to_string()));
        }

        let mut metadata = self.metadata("query");
        let filter = self
            .plugins
            .chain(HookCategory::Query, names::BEFORE_QUERY, filter.clone(), metadata.clone())
            .await?;
        metadata.insert(
            "filter".into(),
            serde_json::to_value(&filter).unwrap_or(Value::Null),
        );

        let results = match self.inner.query(&filter).await {
            Ok(results) => results,
            Err(e) => {
                let failure = QueryFailure {
                    error: e.to_string(),
                    filter,
                };
                if let Err(hook_err) = self
                    .plugins
                    .execute_query_hooks::<QueryFailure, ()>(names::ON_QUERY_ERROR, failure, metadata)
                    .await
                {
                    tracing::warn!(error = %hook_err, "onQueryError hook failed");
                }
                return Err(e);
            }
        };

        let results = self
            .plugins
            .chain(HookCategory::Query, names::AFTER_QUERY, results, metadata.clone())
            .await?;
        let results = self
            .plugins
            .chain(HookCategory::Query, names::TRANSFORM_QUERY_RESULT, results, metadata)
            .await?;
        Ok(results)
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        self.inner.get_stats().await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.inner.flush().await
    }

    async fn compact(&self) -> Result<(), StorageError> {
        self.inner.compact().await
    }

    async fn clean(&self, before: DateTime<Utc>) -> Result<usize, StorageError> {
        let metadata = self.metadata("clean");
        let before = self
            .plugins
            .chain(HookCategory::Storage, names::BEFORE_DELETE, before, metadata.clone())
            .await?;
        let removed = self.inner.clean(before).await?;
        self.plugins
            .execute_storage_hooks::<DeleteReport, ()>(names::AFTER_DELETE, DeleteReport { before, removed }, metadata)
            .await?;
        Ok(removed)
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{enrich, EventContext, NewEvent};
    use crate::plugin::{BoxError, HookOptions, Plugin, PluginEnvironment};
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn wrapped(plugin: Plugin) -> (PluginAwareStorage, Arc<InMemoryStorage>) {
        let manager = Arc::new(PluginManager::new(PluginEnvironment::default(), HookOptions::default()));
        manager.register(plugin).await.unwrap();
        let inner = Arc::new(InMemoryStorage::new());
        inner.initialize().await.unwrap();
        (PluginAwareStorage::new(inner.clone(), manager), inner)
    }

    fn event(category: &str) -> TelemetryEvent {
        enrich(NewEvent::new(category, "code"), &EventContext::default())
    }

    #[tokio::test]
    async fn test_before_store_filtering_to_nothing_is_a_noop() {
        let plugin = Plugin::builder("drop-all", "1.0.0")
            .before_store(|_events, _ctx| async { Ok::<_, BoxError>(Vec::new()) })
            .build();
        let (storage, inner) = wrapped(plugin).await;

        storage.store(&event("claude")).await.unwrap();
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn test_before_store_sees_provider_name() {
        let plugin = Plugin::builder("tagger", "1.0.0")
            .before_store(|mut events: Vec<TelemetryEvent>, ctx| async move {
                let provider = ctx.provider().unwrap_or_default().to_string();
                for e in &mut events {
                    e.metadata.insert("storedBy".into(), Value::from(provider.clone()));
                }
                Ok::<_, BoxError>(events)
            })
            .build();
        let (storage, inner) = wrapped(plugin).await;

        storage.store(&event("claude")).await.unwrap();
        let stored = inner.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(stored[0].metadata["storedBy"], "memory");
    }

    #[tokio::test]
    async fn test_storage_error_hook_runs_before_rethrow() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let plugin = Plugin::builder("watcher", "1.0.0")
            .on_storage_error(move |_failure, _ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            })
            .build();
        let (storage, inner) = wrapped(plugin).await;
        inner.shutdown().await.unwrap();

        let err = storage.store(&event("claude")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized(_)));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_hooks_rewrite_filter_and_results() {
        let plugin = Plugin::builder("scoper", "1.0.0")
            .before_query(|mut filter: QueryFilter, _ctx| async move {
                filter.category = Some("claude".into());
                Ok::<_, BoxError>(filter)
            })
            .transform_query_result(|mut results: Vec<TelemetryEvent>, _ctx| async move {
                results.reverse();
                Ok::<_, BoxError>(results)
            })
            .build();
        let (storage, _inner) = wrapped(plugin).await;
        let first = event("claude");
        let second = event("claude");
        storage.store(&first).await.unwrap();
        storage.store(&event("other")).await.unwrap();
        storage.store(&second).await.unwrap();

        let results = storage.query(&QueryFilter::default()).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
    }

    #[tokio::test]
    async fn test_before_delete_can_move_cutoff() {
        let plugin = Plugin::builder("keep-all", "1.0.0")
            .before_delete(|_before, _ctx| async {
                Ok::<_, BoxError>(Utc::now() - chrono::Duration::days(365))
            })
            .build();
        let (storage, inner) = wrapped(plugin).await;
        storage.store(&event("claude")).await.unwrap();

        let removed = storage.clean(Utc::now() + chrono::Duration::days(1)).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(inner.len(), 1);
    }
}
