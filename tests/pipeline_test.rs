//! End-to-end pipeline behavior through `TelemetryService`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};

use gg_telemetry::config::{CircuitBreakerConfig, RateLimitConfig, StorageConfig};
use gg_telemetry::event::{enrich, EventContext, EventType, NewEvent, QueryFilter, TelemetryEvent};
use gg_telemetry::export::{ExportError, Exporter};
use gg_telemetry::plugin::{BoxError, Plugin};
use gg_telemetry::service::{HealthState, ServiceEvent, TelemetryError, TelemetryService};
use gg_telemetry::storage::{StorageError, StorageFactory, StorageProvider, StorageStats};
use gg_telemetry::TelemetryConfig;

/// Test provider that can be told to fail and can be pre-seeded.
struct FakeStorage {
    name: String,
    failing: AtomicBool,
    events: RwLock<Vec<TelemetryEvent>>,
    writes: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl FakeStorage {
    fn new(name: &str, failing: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: AtomicBool::new(failing),
            events: RwLock::new(Vec::new()),
            writes: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        })
    }

    fn seed(&self, event: TelemetryEvent) {
        self.events.write().push(event);
    }

    fn fail(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::backend(&self.name, format!("{} is down", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl StorageProvider for FakeStorage {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_query(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn store(&self, event: &TelemetryEvent) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.fail()?;
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> Result<Vec<TelemetryEvent>, StorageError> {
        self.fail()?;
        Ok(filter.apply(self.events.read().iter().cloned()))
    }

    async fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            provider: self.name.clone(),
            total_events: self.events.read().len() as u64,
            ..Default::default()
        })
    }

    async fn clean(&self, before: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut events = self.events.write();
        let len = events.len();
        events.retain(|e| e.timestamp >= before);
        Ok(len - events.len())
    }

    async fn shutdown(&self) -> Result<(), StorageError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Service whose storage entries are backed by `providers`, in order.
async fn service_with(providers: &[Arc<FakeStorage>]) -> TelemetryService {
    let mut config = TelemetryConfig::new("pipeline-test");
    config.storage = providers
        .iter()
        .map(|p| {
            let mut entry = StorageConfig::new("fake");
            entry.options.insert("name".into(), json!(p.name));
            entry
        })
        .collect();
    let service = TelemetryService::new(config).unwrap();
    service.register_storage_factory("fake", fake_factory(providers));
    service.initialize().await.unwrap();
    service
}

fn fake_factory(providers: &[Arc<FakeStorage>]) -> StorageFactory {
    let providers = providers.to_vec();
    Arc::new(move |config: &StorageConfig| {
        let name = config.options.get("name").and_then(Value::as_str).unwrap_or_default();
        providers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.clone() as Arc<dyn StorageProvider>)
            .ok_or_else(|| StorageError::UnknownType(name.to_string()))
    })
}

async fn memory_service() -> TelemetryService {
    let service = TelemetryService::new(TelemetryConfig::new("pipeline-test")).unwrap();
    service.initialize().await.unwrap();
    service
}

// =============================================================================
// Enrichment
// =============================================================================

#[tokio::test]
async fn stored_events_always_have_identity_fields() {
    let service = memory_service().await;
    service.track(NewEvent::default()).await.unwrap();

    let stored = service.query(QueryFilter::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    let event = &stored[0];
    assert!(!event.id.is_empty());
    assert!(!event.session_id.is_empty());
    assert_eq!(event.event_type, EventType::Custom);
    assert_eq!(event.category, "unknown");
    assert_eq!(event.action, "unknown");
    service.shutdown().await;
}

#[tokio::test]
async fn session_round_trip_preserves_insertion_order() {
    let service = memory_service().await;
    let start = service
        .track(NewEvent::new("claude", "code").event_type(EventType::Start))
        .await
        .unwrap();
    service
        .track(NewEvent::new("other", "noise"))
        .await
        .unwrap();
    service
        .track(
            NewEvent::new("claude", "code")
                .event_type(EventType::End)
                .session(start.session_id.clone()),
        )
        .await
        .unwrap();

    let session = service.query(QueryFilter::session(&start.session_id)).await.unwrap();
    let types: Vec<EventType> = session.iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![EventType::Start, EventType::End]);
    service.shutdown().await;
}

// =============================================================================
// Storage fan-out
// =============================================================================

#[tokio::test]
async fn one_healthy_provider_is_enough() {
    let providers = [
        FakeStorage::new("a", true),
        FakeStorage::new("b", false),
        FakeStorage::new("c", true),
    ];
    let service = service_with(&providers).await;
    let mut notifications = service.subscribe();

    let event = service.track(NewEvent::new("claude", "code")).await.unwrap();

    assert_eq!(providers[1].events.read()[0].id, event.id);
    let mut failed = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        if let ServiceEvent::StorageError { provider, .. } = notification {
            failed.push(provider);
        }
    }
    failed.sort();
    assert_eq!(failed, vec!["a".to_string(), "c".to_string()]);
    service.shutdown().await;
}

#[tokio::test]
async fn total_failure_names_every_provider() {
    let providers = [
        FakeStorage::new("a", true),
        FakeStorage::new("b", true),
        FakeStorage::new("c", true),
    ];
    let service = service_with(&providers).await;

    let err = service.track(NewEvent::new("claude", "code")).await.unwrap_err();

    let TelemetryError::StorageFailed { failures } = &err else {
        panic!("expected StorageFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 3);
    let message = err.to_string();
    for name in ["a is down", "b is down", "c is down"] {
        assert!(message.contains(name), "{message} should mention {name}");
    }
    service.shutdown().await;
}

#[tokio::test]
async fn open_circuit_skips_provider() {
    let broken = FakeStorage::new("broken", true);
    let healthy = FakeStorage::new("healthy", false);
    let mut config = TelemetryConfig::new("pipeline-test");
    config.reliability.circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 1,
        success_threshold: 1,
        reset_timeout_ms: 60_000,
    };
    config.storage = ["broken", "healthy"]
        .iter()
        .map(|name| {
            let mut entry = StorageConfig::new("fake");
            entry.options.insert("name".into(), json!(name));
            entry
        })
        .collect();
    let service = TelemetryService::new(config).unwrap();
    service.register_storage_factory("fake", fake_factory(&[broken.clone(), healthy.clone()]));
    service.initialize().await.unwrap();

    service.track(NewEvent::new("claude", "code")).await.unwrap();
    service.track(NewEvent::new("claude", "code")).await.unwrap();

    assert_eq!(broken.writes.load(Ordering::SeqCst), 1);
    assert_eq!(healthy.events.read().len(), 2);
    let health = service.health();
    assert_eq!(health.state, HealthState::Degraded);
    assert_eq!(health.open_circuits, vec!["broken".to_string()]);
    service.shutdown().await;
}

// =============================================================================
// Query
// =============================================================================

#[tokio::test]
async fn query_deduplicates_by_id_keeping_first_provider() {
    let first = FakeStorage::new("first", false);
    let second = FakeStorage::new("second", false);
    let event = enrich(NewEvent::new("claude", "code").id("shared"), &EventContext::default());
    let mut copy = event.clone();
    copy.label = Some("from-second".into());
    first.seed(event);
    second.seed(copy);
    second.seed(enrich(NewEvent::new("claude", "code").id("only-second"), &EventContext::default()));

    let service = service_with(&[first, second]).await;
    let results = service.query(QueryFilter::default()).await.unwrap();

    let ids: Vec<&str> = results.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["shared", "only-second"]);
    assert_eq!(results[0].label, None);
    service.shutdown().await;
}

#[tokio::test]
async fn failing_query_provider_is_excluded() {
    let up = FakeStorage::new("up", false);
    let down = FakeStorage::new("down", false);
    let service = service_with(&[up.clone(), down.clone()]).await;
    service.track(NewEvent::new("claude", "code")).await.unwrap();
    down.failing.store(true, Ordering::SeqCst);

    let results = service.query(QueryFilter::default()).await.unwrap();
    assert_eq!(results.len(), 1);

    up.failing.store(true, Ordering::SeqCst);
    let err = service.query(QueryFilter::default()).await.unwrap_err();
    assert!(matches!(err, TelemetryError::StorageFailed { .. }));
    service.shutdown().await;
}

#[tokio::test]
async fn invalid_filter_is_rejected() {
    let service = memory_service().await;
    let filter = QueryFilter {
        limit: Some(0),
        ..Default::default()
    };
    let err = service.query(filter).await.unwrap_err();
    assert!(err.is_capability_error());
    assert!(QueryFilter::from_json(&json!({ "limit": -5 })).is_err());
    assert!(QueryFilter::from_json(&json!({ "limit": "ten" })).is_err());
    service.shutdown().await;
}

// =============================================================================
// Export
// =============================================================================

#[tokio::test]
async fn empty_json_export_is_well_formed() {
    let service = memory_service().await;
    let result = service.export("json", QueryFilter::default()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.format, "json");
    assert_eq!(result.total_events(), 0);
    let parsed: Value = serde_json::from_str(&result.data).unwrap();
    assert_eq!(parsed, json!([]));
    service.shutdown().await;
}

#[tokio::test]
async fn csv_export_has_header_and_rows() {
    let service = memory_service().await;
    service
        .track(NewEvent::new("claude", "code").label("says \"hi\", twice"))
        .await
        .unwrap();

    let result = service.export("CSV", QueryFilter::default()).await.unwrap();
    let mut lines = result.data.split("\r\n");
    assert_eq!(
        lines.next(),
        Some("id,sessionId,eventType,category,action,label,value,duration,timestamp")
    );
    assert!(result.data.contains("\"says \"\"hi\"\", twice\""));
    assert_eq!(result.total_events(), 1);
    service.shutdown().await;
}

struct LinesExporter;

impl Exporter for LinesExporter {
    fn format(&self) -> &str {
        "lines"
    }

    fn content_type(&self) -> &str {
        "text/plain"
    }

    fn export(&self, events: &[TelemetryEvent]) -> Result<String, ExportError> {
        Ok(events.iter().map(|e| e.id.clone()).collect::<Vec<_>>().join("\n"))
    }
}

#[tokio::test]
async fn plugins_add_export_formats_and_observe_failures() {
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    let plugin = Plugin::builder("lines", "1.0.0")
        .exporter(|registrar| registrar.register(Arc::new(LinesExporter)))
        .on_export_error(move |_failure, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            }
        })
        .build();
    let service = TelemetryService::with_plugins(TelemetryConfig::new("pipeline-test"), vec![plugin])
        .await
        .unwrap();
    service.initialize().await.unwrap();
    let event = service.track(NewEvent::new("claude", "code")).await.unwrap();

    let result = service.export("lines", QueryFilter::default()).await.unwrap();
    assert_eq!(result.data, event.id);

    let err = service.export("xml", QueryFilter::default()).await.unwrap_err();
    assert!(err.is_capability_error());
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    service.shutdown().await;
}

// =============================================================================
// Rejection, rate limiting and notifications
// =============================================================================

#[tokio::test]
async fn rejected_event_is_not_stored() {
    let gate = Plugin::builder("gate", "1.0.0")
        .before_track(|event: TelemetryEvent, _ctx| async move {
            Ok::<_, BoxError>((event.category != "secret").then_some(event))
        })
        .build();
    let service = TelemetryService::with_plugins(TelemetryConfig::new("pipeline-test"), vec![gate])
        .await
        .unwrap();
    service.initialize().await.unwrap();
    let mut notifications = service.subscribe();

    let err = service.track(NewEvent::new("secret", "leak")).await.unwrap_err();
    assert!(matches!(&err, TelemetryError::Rejected { plugin } if plugin == "gate"));
    assert!(matches!(notifications.recv().await.unwrap(), ServiceEvent::EventError { .. }));

    service.track(NewEvent::new("claude", "code")).await.unwrap();
    assert_eq!(service.query(QueryFilter::default()).await.unwrap().len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn rate_limit_is_surfaced_to_caller() {
    let mut config = TelemetryConfig::new("pipeline-test");
    config.reliability.rate_limit = RateLimitConfig {
        enabled: true,
        max_events: 2,
        window_ms: 60_000,
    };
    let service = TelemetryService::new(config).unwrap();
    service.initialize().await.unwrap();

    let results = service
        .track_batch((0..3).map(|_| NewEvent::new("claude", "code")).collect())
        .await;
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    let err = results[2].as_ref().unwrap_err();
    assert!(matches!(err, TelemetryError::RateLimited { .. }));
    assert!(err.is_retryable());

    assert_eq!(service.query(QueryFilter::default()).await.unwrap().len(), 2);
    let metrics = service.get_metrics().await;
    assert_eq!(metrics.pipeline.counter("events_rate_limited"), 1);
    assert_eq!(metrics.pipeline.counter("events_tracked"), 2);
    service.shutdown().await;
}

#[tokio::test]
async fn streaming_subscribers_receive_tracked_events() {
    let mut config = TelemetryConfig::new("pipeline-test");
    config.streaming.enabled = true;
    let service = TelemetryService::new(config).unwrap();
    assert!(service.subscribe_stream().is_none());
    service.initialize().await.unwrap();

    let mut stream = service.subscribe_stream().unwrap();
    let event = service.track(NewEvent::new("claude", "code")).await.unwrap();
    assert_eq!(stream.recv().await.unwrap().id, event.id);
    service.shutdown().await;
}

#[tokio::test]
async fn analytics_sees_tracked_events() {
    let plugin = Plugin::builder("annotate", "1.0.0")
        .after_analytics(|mut result: Value, ctx| async move {
            if let Some(map) = result.as_object_mut() {
                map.insert("operation".into(), ctx.get("operation").cloned().unwrap_or(Value::Null));
            }
            Ok::<_, BoxError>(result)
        })
        .build();
    let service = TelemetryService::with_plugins(TelemetryConfig::new("pipeline-test"), vec![plugin])
        .await
        .unwrap();
    service.initialize().await.unwrap();
    service.track(NewEvent::new("claude", "code")).await.unwrap();
    service
        .track(NewEvent::new("claude", "code").event_type(EventType::Error))
        .await
        .unwrap();

    let summary = service.analyze("summary", Value::Null).await.unwrap();
    assert_eq!(summary["totalEvents"], 2);
    assert_eq!(summary["operation"], "summary");
    service.shutdown().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn track_after_shutdown_fails() {
    let service = memory_service().await;
    service.shutdown().await;
    let err = service.track(NewEvent::new("claude", "code")).await.unwrap_err();
    assert!(matches!(err, TelemetryError::NotInitialized));
    assert_eq!(service.health().state, HealthState::Unhealthy);
}

#[tokio::test]
async fn maintenance_applies_retention() {
    let service = memory_service().await;
    service
        .track(NewEvent::new("claude", "code").timestamp(Utc::now() - chrono::Duration::days(90)))
        .await
        .unwrap();
    service.track(NewEvent::new("claude", "code")).await.unwrap();

    let report = service.run_maintenance().await.unwrap();
    assert_eq!(report.total_removed(), 1);
    assert_eq!(service.query(QueryFilter::default()).await.unwrap().len(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn retention_longer_than_calendar_removes_nothing() {
    let mut config = TelemetryConfig::new("pipeline-test");
    config.security.retention.max_age_days = u32::MAX;
    let service = TelemetryService::new(config).unwrap();
    service.initialize().await.unwrap();
    service
        .track(NewEvent::new("claude", "code").timestamp(Utc::now() - chrono::Duration::days(3650)))
        .await
        .unwrap();

    let report = service.run_maintenance().await.unwrap();
    assert_eq!(report.total_removed(), 0);
    assert!(report.failures.is_empty());
    assert_eq!(service.query(QueryFilter::default()).await.unwrap().len(), 1);
    service.shutdown().await;
}

// =============================================================================
// Initialization failures
// =============================================================================

#[tokio::test]
async fn unknown_type_shuts_down_providers_already_started() {
    let first = FakeStorage::new("first", false);
    let mut config = TelemetryConfig::new("pipeline-test");
    let mut entry = StorageConfig::new("fake");
    entry.options.insert("name".into(), json!("first"));
    config.storage = vec![entry, StorageConfig::new("sqlite")];

    let service = TelemetryService::new(config).unwrap();
    service.register_storage_factory("fake", fake_factory(&[first.clone()]));
    let err = service.initialize().await.unwrap_err();

    assert!(err.is_capability_error());
    assert_eq!(first.shutdowns.load(Ordering::SeqCst), 1);
    assert!(!service.is_initialized());
    assert!(service.provider_names().is_empty());
}

#[tokio::test]
async fn duplicate_provider_names_are_rejected() {
    let mut config = TelemetryConfig::new("pipeline-test");
    config.storage = vec![StorageConfig::new("memory"), StorageConfig::new("memory")];
    let service = TelemetryService::new(config).unwrap();

    let err = service.initialize().await.unwrap_err();
    assert!(matches!(err, TelemetryError::Config(_)));
    assert!(err.to_string().contains("duplicate storage provider name: memory"));
    assert!(!service.is_initialized());
}

#[tokio::test]
async fn plugin_contributed_storage_type() {
    let contributed = FakeStorage::new("plugin-store", false);
    let factory = fake_factory(&[contributed.clone()]);
    let plugin = Plugin::builder("remote-storage", "1.0.0")
        .storage_provider(move |registrar| registrar.register("remote", factory.clone()))
        .build();

    let mut config = TelemetryConfig::new("pipeline-test");
    let mut entry = StorageConfig::new("remote");
    entry.options.insert("name".into(), json!("plugin-store"));
    config.storage = vec![entry];
    config.plugins = vec!["remote-storage".into()];

    let service = TelemetryService::with_plugins(config, vec![plugin]).await.unwrap();
    service.initialize().await.unwrap();
    service.track(NewEvent::new("claude", "code")).await.unwrap();

    assert_eq!(service.provider_names(), vec!["plugin-store".to_string()]);
    assert_eq!(contributed.events.read().len(), 1);
    service.shutdown().await;
}
