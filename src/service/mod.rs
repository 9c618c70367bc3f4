//! The telemetry pipeline orchestrator.
//!
//! [`TelemetryService`] owns the storage providers, the plugin manager,
//! the reliability and security layers, the analytics engine and the
//! optional live stream. A tracked event flows through:
//!
//! 1. enrichment (ids, timestamp, merged context)
//! 2. sanitization (PII scrubbing, field encryption)
//! 3. the rate limiter
//! 4. plugin `beforeTrack`/`afterTrack`
//! 5. fan-out to every provider, each behind its circuit breaker
//! 6. stream publish and analytics update
//!
//! A write succeeds when at least one provider accepted it. Providers
//! that failed are reported as `storage:error` notifications.

mod error;
mod health;
mod lifecycle;
mod maintenance;
mod notify;

pub use error::{ProviderFailure, TelemetryError};
pub use health::{HealthReport, HealthState};
pub use lifecycle::{DrainResult, LifecycleState};
pub use maintenance::MaintenanceReport;
pub use notify::ServiceEvent;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::Instrument;

use self::lifecycle::Lifecycle;
use self::maintenance::{Maintenance, MaintenanceTask, ProviderList};
use self::notify::Notifier;
use crate::analytics::{AnalyticsEngine, AnalyticsError};
use crate::config::{ConfigError, TelemetryConfig};
use crate::event::{enrich, service_context, EventContext, NewEvent, QueryFilter, TelemetryEvent};
use crate::export::{Exporter, ExportResult, ExporterRegistry};
use crate::observability::{MetricsSnapshot, PipelineMetrics, PipelineSpan, SpanExt};
use crate::plugin::{names, ExportFailure, HookCategory, HookStats, Plugin, PluginEnvironment, PluginManager};
use crate::reliability::ReliabilityManager;
use crate::security::SecurityProvider;
use crate::storage::{
    PluginAwareStorage, StorageError, StorageFactory, StorageProvider, StorageRegistry, StorageStats,
};
use crate::streaming::StreamingProvider;

/// Upper bound on waiting for in-flight `track` calls during shutdown.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Service-wide metrics returned by [`TelemetryService::get_metrics`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMetrics {
    pub service_name: String,
    pub initialized: bool,
    pub providers: Vec<StorageStats>,
    pub plugins: Vec<String>,
    pub hooks: HookStats,
    pub open_circuits: Vec<String>,
    pub analytics_events: u64,
    pub streamed_events: u64,
    pub pipeline: MetricsSnapshot,
}

pub struct TelemetryService {
    config: TelemetryConfig,
    defaults: EventContext,
    plugins: Arc<PluginManager>,
    registry: Mutex<StorageRegistry>,
    providers: ProviderList,
    security: Arc<SecurityProvider>,
    reliability: ReliabilityManager,
    analytics: Option<AnalyticsEngine>,
    streaming: RwLock<Option<Arc<StreamingProvider>>>,
    exporters: ExporterRegistry,
    notifier: Notifier,
    lifecycle: Lifecycle,
    /// Serializes initialize and shutdown.
    transitions: tokio::sync::Mutex<()>,
    maintenance: Mutex<Option<MaintenanceTask>>,
    metrics: PipelineMetrics,
    started: Instant,
}

impl TelemetryService {
    /// Build an uninitialized service. The configuration is validated here.
    pub fn new(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        config.validate()?;

        let security = SecurityProvider::new(&config.security)?;
        let environment = PluginEnvironment {
            service_name: config.service_name.clone(),
            service_version: config.service_version.clone(),
            environment: config.environment.clone(),
        };
        let plugins = PluginManager::new(environment, config.hooks.to_options());
        let defaults = service_context(&config.environment, &config.service_version, &config.default_context);
        let analytics = config
            .analytics
            .enabled
            .then(|| AnalyticsEngine::new(&config.analytics));

        Ok(Self {
            defaults,
            plugins: Arc::new(plugins),
            registry: Mutex::new(StorageRegistry::new()),
            providers: Arc::new(RwLock::new(Vec::new())),
            security: Arc::new(security),
            reliability: ReliabilityManager::new(config.reliability.clone()),
            analytics,
            streaming: RwLock::new(None),
            exporters: ExporterRegistry::new(),
            notifier: Notifier::new(),
            lifecycle: Lifecycle::new(),
            transitions: tokio::sync::Mutex::new(()),
            maintenance: Mutex::new(None),
            metrics: PipelineMetrics::default(),
            started: Instant::now(),
            config,
        })
    }

    /// Build a service and register `plugins` in order.
    pub async fn with_plugins(config: TelemetryConfig, plugins: Vec<Plugin>) -> Result<Self, TelemetryError> {
        let service = Self::new(config)?;
        for plugin in plugins {
            service.register_plugin(plugin).await?;
        }
        Ok(service)
    }

    pub async fn register_plugin(&self, plugin: Plugin) -> Result<(), TelemetryError> {
        self.plugins.register(plugin).await?;
        Ok(())
    }

    pub async fn unregister_plugin(&self, name: &str) -> Result<(), TelemetryError> {
        self.plugins.unregister(name).await?;
        Ok(())
    }

    /// Make a storage type available to the configuration. Takes effect at
    /// the next `initialize`.
    pub fn register_storage_factory(&self, storage_type: impl Into<String>, factory: StorageFactory) {
        self.registry.lock().register(storage_type, factory);
    }

    /// Construct and initialize every enabled provider, start the stream
    /// and the maintenance timer. A second call is a no-op.
    ///
    /// Providers that fail to initialize are skipped; if none is left the
    /// call fails with [`TelemetryError::NoStorageProviders`]. An unknown
    /// storage type or two providers with the same name fail the call
    /// outright, after shutting down the providers already started.
    pub async fn initialize(&self) -> Result<(), TelemetryError> {
        let _transition = self.transitions.lock().await;
        if self.lifecycle.is_running() {
            return Ok(());
        }

        let missing: Vec<String> = self
            .config
            .plugins
            .iter()
            .filter(|name| !self.plugins.is_registered(name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(TelemetryError::MissingPlugins(missing));
        }

        let mut registry = self.registry.lock().clone();
        for (storage_type, factory) in self.plugins.custom_storage_factories() {
            registry.register(storage_type, factory);
        }

        let providers = match self.build_providers(&registry).await {
            Ok(providers) => providers,
            Err((started, e)) => {
                shutdown_providers(&started).await;
                return Err(e);
            }
        };
        if providers.is_empty() {
            return Err(TelemetryError::NoStorageProviders);
        }

        let provider_names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
        *self.providers.write() = providers;
        self.metrics.gauge("storage_providers", provider_names.len() as f64);

        if self.config.streaming.enabled {
            *self.streaming.write() = Some(Arc::new(StreamingProvider::new(&self.config.streaming)));
        }

        let task = self
            .maintenance_runner()
            .spawn(Duration::from_millis(self.config.maintenance_interval_ms));
        *self.maintenance.lock() = Some(task);

        self.lifecycle.start();
        tracing::info!(
            service = %self.config.service_name,
            providers = ?provider_names,
            plugins = self.plugins.plugin_count(),
            "telemetry service initialized"
        );
        self.notifier.emit(ServiceEvent::Initialized {
            providers: provider_names,
        });
        Ok(())
    }

    /// Construct and initialize the enabled providers in order. On a hard
    /// error the providers initialized so far are returned with it so the
    /// caller can shut them down.
    async fn build_providers(
        &self,
        registry: &StorageRegistry,
    ) -> Result<Vec<Arc<dyn StorageProvider>>, (Vec<Arc<dyn StorageProvider>>, TelemetryError)> {
        let mut providers: Vec<Arc<dyn StorageProvider>> = Vec::new();
        let mut names = HashSet::new();
        for entry in self.config.storage.iter().filter(|s| s.enabled) {
            let inner = match registry.create(entry) {
                Ok(inner) => inner,
                Err(e) => return Err((providers, e.into())),
            };
            if !names.insert(inner.name().to_string()) {
                let e = ConfigError::Invalid {
                    field: "storage",
                    reason: format!("duplicate storage provider name: {}", inner.name()),
                };
                return Err((providers, e.into()));
            }

            let provider: Arc<dyn StorageProvider> =
                Arc::new(PluginAwareStorage::new(inner, self.plugins.clone()));
            match provider.initialize().await {
                Ok(()) => {
                    tracing::info!(
                        provider = %provider.name(),
                        storage_type = %entry.storage_type,
                        "storage provider initialized"
                    );
                    providers.push(provider);
                }
                Err(e) => {
                    tracing::warn!(provider = %provider.name(), error = %e, "storage provider failed to initialize");
                    self.notifier.storage_error(provider.name(), "initialize", &e);
                }
            }
        }
        Ok(providers)
    }

    /// Track one event through the whole pipeline and return it as stored.
    pub async fn track(&self, event: NewEvent) -> Result<TelemetryEvent, TelemetryError> {
        let _in_flight = self.lifecycle.enter()?;
        let started = Instant::now();

        let event = enrich(event, &self.defaults);
        let event_id = event.id.clone();
        let span = PipelineSpan::track(&event_id, &event.category);

        let result = self.process(event).instrument(span.clone()).await;

        span.complete(started, &result);
        match &result {
            Ok(event) => {
                self.metrics.tracked(started.elapsed());
                self.notifier.emit(ServiceEvent::EventTracked {
                    event_id: event.id.clone(),
                    session_id: event.session_id.clone(),
                });
            }
            Err(e) => {
                match e {
                    TelemetryError::Rejected { plugin } => self.metrics.rejected(plugin),
                    TelemetryError::RateLimited { .. } => self.metrics.rate_limited(),
                    _ => self.metrics.failed(),
                }
                tracing::debug!(event_id = %event_id, error = %e, "event not tracked");
                self.notifier.emit(ServiceEvent::EventError {
                    event_id,
                    error: e.to_string(),
                });
            }
        }
        result
    }

    /// Track events one after another, keeping each outcome.
    pub async fn track_batch(&self, events: Vec<NewEvent>) -> Vec<Result<TelemetryEvent, TelemetryError>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.track(event).await);
        }
        results
    }

    async fn process(&self, event: TelemetryEvent) -> Result<TelemetryEvent, TelemetryError> {
        let event = self.security.sanitize(event)?;

        self.reliability
            .check_rate_limit()
            .map_err(|e| TelemetryError::RateLimited {
                retry_after_ms: e.retry_after_ms,
            })?;

        let event = self.plugins.process_event(event).await?;
        self.store_event(&event).await?;

        if let Some(stream) = self.stream() {
            stream.publish(&event);
        }
        if let Some(analytics) = &self.analytics {
            analytics.record(&event);
        }
        Ok(event)
    }

    /// Write `event` to every provider concurrently.
    ///
    /// Succeeds if at least one provider accepted the write. A provider
    /// whose circuit is open is not called and counts as failed. When all
    /// providers fail, the error lists each one.
    pub async fn store_event(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let providers = self.providers.read().clone();
        if providers.is_empty() {
            return Err(TelemetryError::NoStorageProviders);
        }

        let writes = providers.iter().map(|provider| async move {
            self.reliability
                .execute(provider.name(), || provider.store(event))
                .await
        });
        let outcomes = join_all(writes).await;

        let mut stored = 0usize;
        let mut failures = Vec::new();
        for (provider, outcome) in providers.iter().zip(outcomes) {
            let name = provider.name();
            match outcome {
                Ok(()) => {
                    stored += 1;
                    self.metrics.provider_write(name, true);
                }
                Err(e) => {
                    self.metrics.provider_write(name, false);
                    tracing::warn!(provider = %name, event_id = %event.id, error = %e, "storage write failed");
                    self.notifier.storage_error(name, "store", &e);
                    failures.push(ProviderFailure::new(name, &e));
                }
            }
        }

        if stored == 0 {
            return Err(TelemetryError::StorageFailed { failures });
        }
        if !failures.is_empty() {
            tracing::debug!(
                event_id = %event.id,
                stored,
                failed = failures.len(),
                "event stored with partial provider failure"
            );
        }
        Ok(())
    }

    /// Query every provider that supports queries and merge the results.
    ///
    /// Results keep provider order and are deduplicated by id, the first
    /// occurrence winning. Failing providers are reported and left out;
    /// if all of them fail the call fails.
    pub async fn query(&self, filter: QueryFilter) -> Result<Vec<TelemetryEvent>, TelemetryError> {
        self.ensure_initialized()?;
        filter.validate()?;

        let providers: Vec<Arc<dyn StorageProvider>> = self
            .providers
            .read()
            .iter()
            .filter(|p| p.supports_query())
            .cloned()
            .collect();
        if providers.is_empty() {
            return Err(StorageError::QueryNotSupported(self.provider_names().join(", ")).into());
        }

        let started = Instant::now();
        let span = PipelineSpan::query(providers.len());
        let outcomes = join_all(providers.iter().map(|p| p.query(&filter)))
            .instrument(span.clone())
            .await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut failures = Vec::new();
        for (provider, outcome) in providers.iter().zip(outcomes) {
            match outcome {
                Ok(events) => {
                    merged.extend(events.into_iter().filter(|e| seen.insert(e.id.clone())));
                }
                Err(e) => {
                    tracing::warn!(provider = %provider.name(), error = %e, "storage query failed");
                    self.notifier.storage_error(provider.name(), "query", &e);
                    failures.push(ProviderFailure::new(provider.name(), &e));
                }
            }
        }

        let result = if failures.len() == providers.len() {
            Err(TelemetryError::StorageFailed { failures })
        } else {
            if let Some(limit) = filter.limit {
                merged.truncate(limit);
            }
            Ok(merged)
        };

        span.complete(started, &result);
        if let Ok(events) = &result {
            span.record("results", events.len());
            self.metrics.query(events.len(), started.elapsed());
        }
        result
    }

    /// Export the events matching `filter` in `format`.
    ///
    /// `json` and `csv` are built in; plugins may add or replace formats.
    /// Any failure runs the `onExportError` hooks before being returned.
    pub async fn export(&self, format: &str, filter: QueryFilter) -> Result<ExportResult, TelemetryError> {
        self.ensure_initialized()?;

        let started = Instant::now();
        let span = PipelineSpan::export(format);
        let mut metadata = Map::new();
        metadata.insert("format".into(), Value::from(format));

        let result = self
            .export_events(format, filter, &metadata)
            .instrument(span.clone())
            .await;

        match &result {
            Ok(exported) => {
                span.record("total_events", exported.total_events());
                self.metrics.exported(&exported.format, exported.total_events());
            }
            Err(e) => {
                let failure = ExportFailure {
                    error: e.to_string(),
                    format: format.to_string(),
                };
                if let Err(hook_err) = self
                    .plugins
                    .execute_export_hooks::<ExportFailure, ()>(names::ON_EXPORT_ERROR, failure, metadata)
                    .await
                {
                    tracing::warn!(error = %hook_err, "onExportError hook failed");
                }
            }
        }
        span.complete(started, &result);
        result
    }

    async fn export_events(
        &self,
        format: &str,
        filter: QueryFilter,
        metadata: &Map<String, Value>,
    ) -> Result<ExportResult, TelemetryError> {
        let exporter = self.exporter(format)?;
        let events = self.query(filter).await?;
        let events = self
            .plugins
            .chain(HookCategory::Export, names::BEFORE_EXPORT, events, metadata.clone())
            .await?;

        let data = exporter.export(&events)?;
        let result = ExportResult::new(exporter.format(), data, events.len());

        Ok(self
            .plugins
            .chain(HookCategory::Export, names::AFTER_EXPORT, result, metadata.clone())
            .await?)
    }

    fn exporter(&self, format: &str) -> Result<Arc<dyn Exporter>, TelemetryError> {
        let mut registry = self.exporters.clone();
        for exporter in self.plugins.custom_exporters() {
            registry.register(exporter);
        }
        Ok(registry.get(format)?)
    }

    /// Formats `export` currently accepts.
    pub fn export_formats(&self) -> Vec<String> {
        let mut registry = self.exporters.clone();
        for exporter in self.plugins.custom_exporters() {
            registry.register(exporter);
        }
        registry.formats()
    }

    /// Run an analytics operation with the `beforeAnalytics` and
    /// `afterAnalytics` hooks around it.
    pub async fn analyze(&self, operation: &str, params: Value) -> Result<Value, TelemetryError> {
        let engine = self.analytics.as_ref().ok_or(AnalyticsError::Disabled)?;

        let mut metadata = Map::new();
        metadata.insert("operation".into(), Value::from(operation));

        let params = self
            .plugins
            .chain(HookCategory::Analytics, names::BEFORE_ANALYTICS, params, metadata.clone())
            .await?;
        let result = engine.compute(operation, &params)?;
        Ok(self
            .plugins
            .chain(HookCategory::Analytics, names::AFTER_ANALYTICS, result, metadata)
            .await?)
    }

    /// Flush every provider concurrently. Failures are logged and
    /// notified, never aggregated.
    pub async fn flush(&self) {
        let providers = self.providers.read().clone();
        let outcomes = join_all(providers.iter().map(|p| p.flush())).await;
        for (provider, outcome) in providers.iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(provider = %provider.name(), error = %e, "flush failed");
                self.notifier.storage_error(provider.name(), "flush", &e);
            }
        }
    }

    /// Stop the maintenance timer, drain in-flight `track` calls, flush,
    /// then shut down providers, the stream and the plugins concurrently.
    pub async fn shutdown(&self) {
        let _transition = self.transitions.lock().await;
        if self.lifecycle.state() == LifecycleState::Uninitialized {
            return;
        }

        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }

        if let DrainResult::Timeout { remaining } = self.lifecycle.drain(SHUTDOWN_DRAIN_TIMEOUT).await {
            tracing::warn!(remaining, "shutdown proceeding with events still in flight");
        }

        self.flush().await;

        let providers = std::mem::take(&mut *self.providers.write());
        let stream = self.streaming.write().take();

        let storage = shutdown_providers(&providers);
        let streaming = async {
            if let Some(stream) = stream {
                stream.shutdown();
            }
        };
        tokio::join!(storage, streaming, self.plugins.shutdown());

        self.lifecycle.finish();
        self.metrics.gauge("storage_providers", 0.0);
        tracing::info!(service = %self.config.service_name, "telemetry service shut down");
        self.notifier.emit(ServiceEvent::Shutdown);
    }

    /// Run retention cleanup and compaction once.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, TelemetryError> {
        self.ensure_initialized()?;
        Ok(self.maintenance_runner().run().await)
    }

    pub async fn get_metrics(&self) -> TelemetryMetrics {
        let providers = self.providers.read().clone();
        let stats = join_all(providers.iter().map(|p| p.get_stats())).await;

        TelemetryMetrics {
            service_name: self.config.service_name.clone(),
            initialized: self.is_initialized(),
            providers: stats.into_iter().filter_map(Result::ok).collect(),
            plugins: self.plugins.plugin_names(),
            hooks: self.plugins.hook_stats(),
            open_circuits: self.reliability.open_circuits(),
            analytics_events: self.analytics.as_ref().map_or(0, |a| a.total_events()),
            streamed_events: self.stream().map_or(0, |s| s.published()),
            pipeline: self.metrics.store().snapshot(),
        }
    }

    pub fn health(&self) -> HealthReport {
        let providers = self.provider_names();
        let open_circuits = self.reliability.open_circuits();
        let accepting = self.lifecycle.is_running();
        HealthReport {
            state: health::compute_state(accepting, &providers, &open_circuits),
            accepting_events: accepting,
            providers,
            open_circuits,
            plugins: self.plugins.plugin_count(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Lifecycle and pipeline notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.notifier.subscribe()
    }

    /// Live tracked events, when streaming is enabled and the service is
    /// initialized.
    pub fn subscribe_stream(&self) -> Option<broadcast::Receiver<TelemetryEvent>> {
        self.stream().map(|s| s.subscribe())
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub fn security(&self) -> &SecurityProvider {
        &self.security
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle.state() != LifecycleState::Uninitialized
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.name().to_string()).collect()
    }

    fn ensure_initialized(&self) -> Result<(), TelemetryError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TelemetryError::NotInitialized)
        }
    }

    fn stream(&self) -> Option<Arc<StreamingProvider>> {
        self.streaming.read().clone()
    }

    fn maintenance_runner(&self) -> Maintenance {
        Maintenance {
            providers: self.providers.clone(),
            security: self.security.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

async fn shutdown_providers(providers: &[Arc<dyn StorageProvider>]) {
    let outcomes = join_all(providers.iter().map(|p| p.shutdown())).await;
    for (provider, outcome) in providers.iter().zip(outcomes) {
        if let Err(e) = outcome {
            tracing::warn!(provider = %provider.name(), error = %e, "provider shutdown failed");
        }
    }
}
