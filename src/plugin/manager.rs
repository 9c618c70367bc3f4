//! Plugin lifecycle and typed entry points into the hook executor.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::context::{names, HookCategory, HookContext, HookFn, HookOptions};
use super::definition::{ExporterRegistrar, Plugin, PluginEnvironment, ProviderRegistrar};
use super::error::{BoxError, HookError, PluginError};
use super::executor::{HookExecutor, HookStats};
use crate::event::TelemetryEvent;
use crate::export::Exporter;
use crate::storage::StorageFactory;

struct ContributedFactory {
    plugin: String,
    storage_type: String,
    factory: StorageFactory,
}

struct ContributedExporter {
    plugin: String,
    exporter: Arc<dyn Exporter>,
}

/// Owns the registered plugin set and the hook executor.
pub struct PluginManager {
    plugins: RwLock<Vec<Arc<Plugin>>>,
    executor: HookExecutor,
    options: HookOptions,
    environment: PluginEnvironment,
    factories: RwLock<Vec<ContributedFactory>>,
    exporters: RwLock<Vec<ContributedExporter>>,
    /// Serializes register/unregister/shutdown.
    lifecycle: Mutex<()>,
}

impl PluginManager {
    pub fn new(environment: PluginEnvironment, options: HookOptions) -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
            executor: HookExecutor::new(),
            options,
            environment,
            factories: RwLock::new(Vec::new()),
            exporters: RwLock::new(Vec::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Default execution policy for the typed wrappers.
    pub fn options(&self) -> &HookOptions {
        &self.options
    }

    pub fn executor(&self) -> &HookExecutor {
        &self.executor
    }

    pub fn hook_stats(&self) -> HookStats {
        self.executor.stats()
    }

    /// Register a plugin.
    ///
    /// The plugin is active only once its `initialize` callback completed;
    /// a failing or timed-out initialization leaves no trace.
    pub async fn register(&self, plugin: Plugin) -> Result<(), PluginError> {
        let _guard = self.lifecycle.lock().await;

        if self.is_registered(&plugin.name) {
            return Err(PluginError::AlreadyRegistered(plugin.name));
        }

        if let Some(init) = &plugin.initialize {
            let outcome = tokio::time::timeout(self.options.timeout, init(self.environment.clone())).await;
            let reason = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("timed out after {}ms", self.options.timeout.as_millis())),
            };
            if let Some(reason) = reason {
                return Err(PluginError::InitializationFailed {
                    name: plugin.name,
                    reason,
                });
            }
        }

        self.register_hooks(&plugin);

        if let Some(contribute) = &plugin.register_storage_provider {
            let mut registrar = ProviderRegistrar::default();
            contribute(&mut registrar);
            let mut factories = self.factories.write();
            for (storage_type, factory) in registrar.entries {
                factories.push(ContributedFactory {
                    plugin: plugin.name.clone(),
                    storage_type,
                    factory,
                });
            }
        }
        if let Some(contribute) = &plugin.register_exporter {
            let mut registrar = ExporterRegistrar::default();
            contribute(&mut registrar);
            let mut exporters = self.exporters.write();
            for exporter in registrar.entries {
                exporters.push(ContributedExporter {
                    plugin: plugin.name.clone(),
                    exporter,
                });
            }
        }

        tracing::info!(plugin = %plugin.name, version = %plugin.version, "plugin registered");
        let mut plugins = self.plugins.write();
        plugins.push(Arc::new(plugin));
        metrics::gauge!("gg_telemetry_plugins").set(plugins.len() as f64);
        Ok(())
    }

    /// Unregister a plugin. Its `shutdown` callback is best-effort.
    pub async fn unregister(&self, name: &str) -> Result<(), PluginError> {
        let _guard = self.lifecycle.lock().await;

        let plugin = self
            .plugins
            .read()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;

        shutdown_plugin(&plugin, self.options.timeout).await;

        self.executor.unregister_plugin(name);
        self.factories.write().retain(|f| f.plugin != name);
        self.exporters.write().retain(|e| e.plugin != name);
        let mut plugins = self.plugins.write();
        plugins.retain(|p| p.name != name);
        metrics::gauge!("gg_telemetry_plugins").set(plugins.len() as f64);

        tracing::info!(plugin = %name, "plugin unregistered");
        Ok(())
    }

    /// Shut every plugin down concurrently, then clear all registries.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;

        let plugins: Vec<Arc<Plugin>> = std::mem::take(&mut *self.plugins.write());
        let timeout = self.options.timeout;
        join_all(plugins.iter().map(|p| shutdown_plugin(p, timeout))).await;

        self.executor.clear();
        self.factories.write().clear();
        self.exporters.write().clear();
        metrics::gauge!("gg_telemetry_plugins").set(0.0);
        tracing::debug!(count = plugins.len(), "plugins shut down");
    }

    /// Run `beforeTrack` in registration order, then `afterTrack` observers.
    ///
    /// Each `beforeTrack` sees the event as left by the previous plugin.
    /// A hook returning `None` rejects the event; a failing hook is skipped
    /// unless the manager runs in strict mode.
    pub async fn process_event(&self, event: TelemetryEvent) -> Result<TelemetryEvent, PluginError> {
        let entries = self.executor.snapshot::<TelemetryEvent, Option<TelemetryEvent>>(
            HookCategory::Track,
            names::BEFORE_TRACK,
            &self.options.skip_plugins,
        );

        let mut current = event;
        if !entries.is_empty() {
            let ctx = HookContext::new(HookCategory::Track, names::BEFORE_TRACK, track_metadata(&current));
            for entry in entries {
                let result = self
                    .executor
                    .invoke(entry, current.clone(), &ctx, self.options.timeout)
                    .await;
                match result.outcome {
                    Ok(Some(next)) => current = next,
                    Ok(None) => {
                        return Err(PluginError::Rejected {
                            plugin: result.plugin,
                        })
                    }
                    Err(e) if !self.options.continue_on_error => return Err(e.into()),
                    Err(_) => {}
                }
            }
        }

        self.executor
            .execute_hooks::<TelemetryEvent, ()>(
                HookCategory::Track,
                names::AFTER_TRACK,
                current.clone(),
                track_metadata(&current),
                &self.options,
            )
            .await?;

        Ok(current)
    }

    pub async fn execute_storage_hooks<A, R>(
        &self,
        hook: &str,
        args: A,
        metadata: Map<String, Value>,
    ) -> Result<Option<R>, HookError>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        self.executor
            .execute_hooks(HookCategory::Storage, hook, args, metadata, &self.options)
            .await
    }

    pub async fn execute_query_hooks<A, R>(
        &self,
        hook: &str,
        args: A,
        metadata: Map<String, Value>,
    ) -> Result<Option<R>, HookError>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        self.executor
            .execute_hooks(HookCategory::Query, hook, args, metadata, &self.options)
            .await
    }

    pub async fn execute_export_hooks<A, R>(
        &self,
        hook: &str,
        args: A,
        metadata: Map<String, Value>,
    ) -> Result<Option<R>, HookError>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        self.executor
            .execute_hooks(HookCategory::Export, hook, args, metadata, &self.options)
            .await
    }

    pub async fn execute_analytics_hooks<A, R>(
        &self,
        hook: &str,
        args: A,
        metadata: Map<String, Value>,
    ) -> Result<Option<R>, HookError>
    where
        A: Clone + Send + 'static,
        R: Send + 'static,
    {
        self.executor
            .execute_hooks(HookCategory::Analytics, hook, args, metadata, &self.options)
            .await
    }

    /// Invoke a plugin-defined custom hook by name.
    pub async fn execute_custom_hook(
        &self,
        name: &str,
        args: Value,
        metadata: Map<String, Value>,
    ) -> Result<Option<Value>, HookError> {
        self.executor
            .execute_hooks(HookCategory::Custom, name, args, metadata, &self.options)
            .await
    }

    /// Thread `value` through a transforming hook of `category`.
    pub async fn chain<T>(
        &self,
        category: HookCategory,
        hook: &str,
        value: T,
        metadata: Map<String, Value>,
    ) -> Result<T, HookError>
    where
        T: Clone + Send + 'static,
    {
        self.executor
            .execute_chain(category, hook, value, metadata, &self.options)
            .await
    }

    /// Registered plugin names in registration order.
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.read().iter().map(|p| p.name.clone()).collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.plugins.read().iter().any(|p| p.name == name)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.read().len()
    }

    /// Storage factories contributed by plugins, as `(type, factory)`.
    pub fn custom_storage_factories(&self) -> Vec<(String, StorageFactory)> {
        self.factories
            .read()
            .iter()
            .map(|f| (f.storage_type.clone(), f.factory.clone()))
            .collect()
    }

    pub fn custom_exporters(&self) -> Vec<Arc<dyn Exporter>> {
        self.exporters.read().iter().map(|e| e.exporter.clone()).collect()
    }

    fn register_hooks(&self, plugin: &Plugin) {
        let name = plugin.name.as_str();
        self.add(HookCategory::Track, names::BEFORE_TRACK, name, &plugin.before_track);
        self.add(HookCategory::Track, names::AFTER_TRACK, name, &plugin.after_track);

        let storage = &plugin.storage;
        self.add(HookCategory::Storage, names::BEFORE_STORE, name, &storage.before_store);
        self.add(HookCategory::Storage, names::AFTER_STORE, name, &storage.after_store);
        self.add(HookCategory::Storage, names::ON_STORAGE_ERROR, name, &storage.on_storage_error);
        self.add(HookCategory::Storage, names::BEFORE_DELETE, name, &storage.before_delete);
        self.add(HookCategory::Storage, names::AFTER_DELETE, name, &storage.after_delete);

        let query = &plugin.query;
        self.add(HookCategory::Query, names::BEFORE_QUERY, name, &query.before_query);
        self.add(HookCategory::Query, names::AFTER_QUERY, name, &query.after_query);
        self.add(HookCategory::Query, names::ON_QUERY_ERROR, name, &query.on_query_error);
        self.add(
            HookCategory::Query,
            names::TRANSFORM_QUERY_RESULT,
            name,
            &query.transform_query_result,
        );

        let export = &plugin.export;
        self.add(HookCategory::Export, names::BEFORE_EXPORT, name, &export.before_export);
        self.add(HookCategory::Export, names::AFTER_EXPORT, name, &export.after_export);
        self.add(HookCategory::Export, names::ON_EXPORT_ERROR, name, &export.on_export_error);

        let analytics = &plugin.analytics;
        self.add(HookCategory::Analytics, names::BEFORE_ANALYTICS, name, &analytics.before_analytics);
        self.add(HookCategory::Analytics, names::AFTER_ANALYTICS, name, &analytics.after_analytics);

        for (hook, f) in &plugin.custom {
            self.executor.register(HookCategory::Custom, hook, name, f.clone());
        }
    }

    fn add<A: 'static, R: 'static>(
        &self,
        category: HookCategory,
        hook: &str,
        plugin: &str,
        f: &Option<HookFn<A, R>>,
    ) {
        if let Some(f) = f {
            self.executor.register(category, hook, plugin, f.clone());
        }
    }
}

async fn shutdown_plugin(plugin: &Plugin, timeout: Duration) {
    let Some(shutdown) = &plugin.shutdown else {
        return;
    };
    let outcome: Result<Result<(), BoxError>, _> = tokio::time::timeout(timeout, shutdown()).await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(plugin = %plugin.name, error = %e, "plugin shutdown failed"),
        Err(_) => tracing::warn!(plugin = %plugin.name, "plugin shutdown timed out"),
    }
}

fn track_metadata(event: &TelemetryEvent) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("eventId".into(), Value::from(event.id.clone()));
    metadata.insert("sessionId".into(), Value::from(event.session_id.clone()));
    metadata
}
