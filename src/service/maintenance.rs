//! Periodic retention cleanup and compaction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::ProviderFailure;
use super::notify::Notifier;
use crate::security::SecurityProvider;
use crate::storage::StorageProvider;

pub(crate) type ProviderList = Arc<RwLock<Vec<Arc<dyn StorageProvider>>>>;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Events removed per provider.
    pub removed: BTreeMap<String, usize>,
    pub failures: Vec<ProviderFailure>,
}

impl MaintenanceReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

#[derive(Clone)]
pub(crate) struct Maintenance {
    pub providers: ProviderList,
    pub security: Arc<SecurityProvider>,
    pub notifier: Notifier,
}

impl Maintenance {
    /// Clean events older than the retention window, then compact, on
    /// every provider concurrently.
    pub async fn run(&self) -> MaintenanceReport {
        let providers = self.providers.read().clone();
        let cutoff = self.security.retention_cutoff(Utc::now());

        let passes = providers.iter().map(|provider| async move {
            let removed = provider.clean(cutoff).await?;
            provider.compact().await?;
            Ok::<_, crate::storage::StorageError>(removed)
        });
        let outcomes = join_all(passes).await;

        let mut report = MaintenanceReport::default();
        for (provider, outcome) in providers.iter().zip(outcomes) {
            match outcome {
                Ok(removed) => {
                    report.removed.insert(provider.name().to_string(), removed);
                }
                Err(e) => {
                    tracing::warn!(provider = %provider.name(), error = %e, "maintenance failed");
                    self.notifier.storage_error(provider.name(), "clean", &e);
                    report.failures.push(ProviderFailure::new(provider.name(), &e));
                }
            }
        }
        tracing::debug!(removed = report.total_removed(), cutoff = %cutoff, "maintenance pass complete");
        report
    }

    /// Run every `interval` until cancelled. The first pass happens one
    /// interval after start.
    pub fn spawn(self, interval: Duration) -> MaintenanceTask {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        self.run().await;
                    }
                }
            }
            tracing::debug!("maintenance timer stopped");
        });
        MaintenanceTask { token, handle }
    }
}

pub(crate) struct MaintenanceTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "maintenance task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::event::{enrich, EventContext, NewEvent};
    use crate::storage::InMemoryStorage;

    fn maintenance(storage: Arc<InMemoryStorage>) -> Maintenance {
        let provider: Arc<dyn StorageProvider> = storage;
        Maintenance {
            providers: Arc::new(RwLock::new(vec![provider])),
            security: Arc::new(SecurityProvider::new(&SecurityConfig::default()).unwrap()),
            notifier: Notifier::new(),
        }
    }

    #[tokio::test]
    async fn test_run_removes_expired_events() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.initialize().await.unwrap();
        let old = enrich(
            NewEvent::new("claude", "code").timestamp(Utc::now() - chrono::Duration::days(45)),
            &EventContext::default(),
        );
        storage.store(&old).await.unwrap();
        storage
            .store(&enrich(NewEvent::new("claude", "code"), &EventContext::default()))
            .await
            .unwrap();

        let report = maintenance(storage.clone()).run().await;
        assert_eq!(report.removed["memory"], 1);
        assert!(report.failures.is_empty());
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let storage = Arc::new(InMemoryStorage::new());
        let report = maintenance(storage).run().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].provider, "memory");
    }

    #[tokio::test]
    async fn test_timer_runs_until_stopped() {
        let storage = Arc::new(InMemoryStorage::new());
        storage.initialize().await.unwrap();
        let old = enrich(
            NewEvent::new("claude", "code").timestamp(Utc::now() - chrono::Duration::days(45)),
            &EventContext::default(),
        );
        storage.store(&old).await.unwrap();

        let task = maintenance(storage.clone()).spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await;
        assert!(storage.is_empty());
    }
}
