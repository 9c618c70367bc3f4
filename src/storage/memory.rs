//! In-memory storage backend.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{StorageError, StorageProvider, StorageStats};
use crate::event::{QueryFilter, TelemetryEvent};

/// Default cap on retained events.
pub const DEFAULT_MAX_EVENTS: usize = 100_000;

/// Bounded, insertion-ordered event store. When full, the oldest event
/// is evicted.
pub struct InMemoryStorage {
    name: String,
    events: RwLock<VecDeque<TelemetryEvent>>,
    max_events: usize,
    initialized: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_capacity("memory", DEFAULT_MAX_EVENTS)
    }

    pub fn with_capacity(name: impl Into<String>, max_events: usize) -> Self {
        Self {
            name: name.into(),
            events: RwLock::new(VecDeque::new()),
            max_events: max_events.max(1),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    fn ensure_initialized(&self) -> Result<(), StorageError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized(self.name.clone()))
        }
    }

    fn push(&self, events: &mut VecDeque<TelemetryEvent>, event: TelemetryEvent) {
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StorageProvider for InMemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_query(&self) -> bool {
        true
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn store(&self, event: &TelemetryEvent) -> Result<(), StorageError> {
        self.ensure_initialized()?;
        let mut events = self.events.write();
        self.push(&mut events, event.clone());
        Ok(())
    }

    async fn store_batch(&self, batch: &[TelemetryEvent]) -> Result<(), StorageError> {
        self.ensure_initialized()?;
        let mut events = self.events.write();
        for event in batch {
            self.push(&mut events, event.clone());
        }
        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<TelemetryEvent>, StorageError> {
        self.ensure_initialized()?;
        filter.validate()?;
        let events = self.events.read();
        Ok(filter.apply(events.iter().cloned()))
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        let events = self.events.read();
        let sessions: HashSet<&str> = events.iter().map(|e| e.session_id.as_str()).collect();
        let size_bytes = events
            .iter()
            .map(|e| serde_json::to_vec(e).map_or(0, |v| v.len() as u64))
            .sum();
        Ok(StorageStats {
            provider: self.name.clone(),
            total_events: events.len() as u64,
            sessions: sessions.len() as u64,
            oldest: events.iter().map(|e| e.timestamp).min(),
            newest: events.iter().map(|e| e.timestamp).max(),
            size_bytes,
        })
    }

    async fn compact(&self) -> Result<(), StorageError> {
        self.events.write().shrink_to_fit();
        Ok(())
    }

    async fn clean(&self, before: DateTime<Utc>) -> Result<usize, StorageError> {
        self.ensure_initialized()?;
        let mut events = self.events.write();
        let len = events.len();
        events.retain(|e| e.timestamp >= before);
        Ok(len - events.len())
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{enrich, EventContext, EventType, NewEvent};
    use chrono::Duration;

    fn event(session: &str, event_type: EventType) -> TelemetryEvent {
        enrich(
            NewEvent::new("claude", "code").session(session).event_type(event_type),
            &EventContext::default(),
        )
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let storage = InMemoryStorage::new();
        let err = storage.store(&event("s", EventType::Start)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_query_preserves_insertion_order() {
        let storage = InMemoryStorage::new();
        storage.initialize().await.unwrap();
        storage.store(&event("s1", EventType::Start)).await.unwrap();
        storage.store(&event("s2", EventType::Start)).await.unwrap();
        storage.store(&event("s1", EventType::End)).await.unwrap();

        let results = storage.query(&QueryFilter::session("s1")).await.unwrap();
        let types: Vec<EventType> = results.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Start, EventType::End]);
    }

    #[tokio::test]
    async fn test_evicts_oldest_when_full() {
        let storage = InMemoryStorage::with_capacity("small", 2);
        storage.initialize().await.unwrap();
        let events: Vec<_> = (0..3).map(|_| event("s", EventType::Custom)).collect();
        storage.store_batch(&events).await.unwrap();

        let stored = storage.query(&QueryFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].id, events[1].id);
    }

    #[tokio::test]
    async fn test_full_store_keeps_latest_in_order() {
        let storage = InMemoryStorage::with_capacity("ring", 3);
        storage.initialize().await.unwrap();
        let events: Vec<_> = (0..10).map(|_| event("s", EventType::Stream)).collect();
        for e in &events {
            storage.store(e).await.unwrap();
        }

        let stored = storage.query(&QueryFilter::default()).await.unwrap();
        let ids: Vec<&str> = stored.iter().map(|e| e.id.as_str()).collect();
        let expected: Vec<&str> = events[7..].iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(storage.len(), 3);
    }

    #[tokio::test]
    async fn test_clean_removes_older_events() {
        let storage = InMemoryStorage::new();
        storage.initialize().await.unwrap();
        let mut old = event("s", EventType::Start);
        old.timestamp = Utc::now() - Duration::days(40);
        storage.store(&old).await.unwrap();
        storage.store(&event("s", EventType::End)).await.unwrap();

        let removed = storage.clean(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        let stats = storage.get_stats().await.unwrap();
        assert_eq!(stats.total_events, 1);
        assert_eq!(stats.sessions, 1);
    }
}
