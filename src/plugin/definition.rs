//! Plugin definition: a named, versioned bundle of optional hooks.
//!
//! Every hook is an optional typed callback, so a plugin's capabilities are
//! visible in its type rather than probed at runtime.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{hook_fn, HookContext, HookFn};
use super::error::BoxError;
use crate::event::{QueryFilter, TelemetryEvent};
use crate::export::{ExportResult, Exporter};
use crate::storage::StorageFactory;

/// What a plugin learns about its host at initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEnvironment {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
}

/// Payload of `afterStore`.
#[derive(Debug, Clone)]
pub struct StoreReport {
    pub events: Vec<TelemetryEvent>,
    pub stored: usize,
}

/// Payload of `onStorageError`.
#[derive(Debug, Clone)]
pub struct StorageFailure {
    pub error: String,
    pub events: Vec<TelemetryEvent>,
}

/// Payload of `afterDelete`.
#[derive(Debug, Clone, Copy)]
pub struct DeleteReport {
    pub before: DateTime<Utc>,
    pub removed: usize,
}

/// Payload of `onQueryError`.
#[derive(Debug, Clone)]
pub struct QueryFailure {
    pub error: String,
    pub filter: QueryFilter,
}

/// Payload of `onExportError`.
#[derive(Debug, Clone)]
pub struct ExportFailure {
    pub error: String,
    pub format: String,
}

pub type InitializeFn =
    Arc<dyn Fn(PluginEnvironment) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub type ShutdownFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub type ProviderRegistrationFn = Arc<dyn Fn(&mut ProviderRegistrar) + Send + Sync>;
pub type ExporterRegistrationFn = Arc<dyn Fn(&mut ExporterRegistrar) + Send + Sync>;

/// Collects storage provider factories contributed by a plugin.
#[derive(Default)]
pub struct ProviderRegistrar {
    pub(crate) entries: Vec<(String, StorageFactory)>,
}

impl ProviderRegistrar {
    pub fn register(&mut self, storage_type: impl Into<String>, factory: StorageFactory) {
        self.entries.push((storage_type.into(), factory));
    }
}

/// Collects exporters contributed by a plugin.
#[derive(Default)]
pub struct ExporterRegistrar {
    pub(crate) entries: Vec<Arc<dyn Exporter>>,
}

impl ExporterRegistrar {
    pub fn register(&mut self, exporter: Arc<dyn Exporter>) {
        self.entries.push(exporter);
    }
}

#[derive(Clone, Default)]
pub struct StorageHooks {
    /// May shrink the batch; an empty result skips the write.
    pub before_store: Option<HookFn<Vec<TelemetryEvent>, Vec<TelemetryEvent>>>,
    pub after_store: Option<HookFn<StoreReport, ()>>,
    pub on_storage_error: Option<HookFn<StorageFailure, ()>>,
    /// May move the retention cutoff.
    pub before_delete: Option<HookFn<DateTime<Utc>, DateTime<Utc>>>,
    pub after_delete: Option<HookFn<DeleteReport, ()>>,
}

#[derive(Clone, Default)]
pub struct QueryHooks {
    pub before_query: Option<HookFn<QueryFilter, QueryFilter>>,
    /// The filter is available as `ctx.metadata["filter"]`.
    pub after_query: Option<HookFn<Vec<TelemetryEvent>, Vec<TelemetryEvent>>>,
    pub on_query_error: Option<HookFn<QueryFailure, ()>>,
    pub transform_query_result: Option<HookFn<Vec<TelemetryEvent>, Vec<TelemetryEvent>>>,
}

#[derive(Clone, Default)]
pub struct ExportHooks {
    /// The format is available as `ctx.metadata["format"]`.
    pub before_export: Option<HookFn<Vec<TelemetryEvent>, Vec<TelemetryEvent>>>,
    pub after_export: Option<HookFn<ExportResult, ExportResult>>,
    pub on_export_error: Option<HookFn<ExportFailure, ()>>,
}

#[derive(Clone, Default)]
pub struct AnalyticsHooks {
    /// Rewrites operation parameters; the operation is `ctx.metadata["operation"]`.
    pub before_analytics: Option<HookFn<Value, Value>>,
    /// Rewrites the operation result.
    pub after_analytics: Option<HookFn<Value, Value>>,
}

/// A plugin. Identity is `name`.
#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub initialize: Option<InitializeFn>,
    pub shutdown: Option<ShutdownFn>,
    /// Returning `None` rejects the event.
    pub before_track: Option<HookFn<TelemetryEvent, Option<TelemetryEvent>>>,
    pub after_track: Option<HookFn<TelemetryEvent, ()>>,
    pub storage: StorageHooks,
    pub query: QueryHooks,
    pub export: ExportHooks,
    pub analytics: AnalyticsHooks,
    pub register_storage_provider: Option<ProviderRegistrationFn>,
    pub register_exporter: Option<ExporterRegistrationFn>,
    /// Invoked only through `execute_custom_hook`.
    pub custom: HashMap<String, HookFn<Value, Value>>,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("custom_hooks", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Plugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            initialize: None,
            shutdown: None,
            before_track: None,
            after_track: None,
            storage: StorageHooks::default(),
            query: QueryHooks::default(),
            export: ExportHooks::default(),
            analytics: AnalyticsHooks::default(),
            register_storage_provider: None,
            register_exporter: None,
            custom: HashMap::new(),
        }
    }

    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> PluginBuilder {
        PluginBuilder {
            plugin: Self::new(name, version),
        }
    }
}

/// Fluent construction of a [`Plugin`] from async closures.
pub struct PluginBuilder {
    plugin: Plugin,
}

impl PluginBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.plugin.description = Some(description.into());
        self
    }

    pub fn on_initialize<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(PluginEnvironment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.initialize = Some(Arc::new(move |env| f(env).boxed()));
        self
    }

    pub fn on_shutdown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.shutdown = Some(Arc::new(move || f().boxed()));
        self
    }

    pub fn before_track<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TelemetryEvent, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<TelemetryEvent>, BoxError>> + Send + 'static,
    {
        self.plugin.before_track = Some(hook_fn(f));
        self
    }

    pub fn after_track<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TelemetryEvent, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.after_track = Some(hook_fn(f));
        self
    }

    pub fn before_store<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Vec<TelemetryEvent>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TelemetryEvent>, BoxError>> + Send + 'static,
    {
        self.plugin.storage.before_store = Some(hook_fn(f));
        self
    }

    pub fn after_store<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StoreReport, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.storage.after_store = Some(hook_fn(f));
        self
    }

    pub fn on_storage_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(StorageFailure, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.storage.on_storage_error = Some(hook_fn(f));
        self
    }

    pub fn before_delete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DateTime<Utc>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DateTime<Utc>, BoxError>> + Send + 'static,
    {
        self.plugin.storage.before_delete = Some(hook_fn(f));
        self
    }

    pub fn after_delete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(DeleteReport, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.storage.after_delete = Some(hook_fn(f));
        self
    }

    pub fn before_query<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryFilter, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<QueryFilter, BoxError>> + Send + 'static,
    {
        self.plugin.query.before_query = Some(hook_fn(f));
        self
    }

    pub fn after_query<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Vec<TelemetryEvent>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TelemetryEvent>, BoxError>> + Send + 'static,
    {
        self.plugin.query.after_query = Some(hook_fn(f));
        self
    }

    pub fn on_query_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryFailure, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.query.on_query_error = Some(hook_fn(f));
        self
    }

    pub fn transform_query_result<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Vec<TelemetryEvent>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TelemetryEvent>, BoxError>> + Send + 'static,
    {
        self.plugin.query.transform_query_result = Some(hook_fn(f));
        self
    }

    pub fn before_export<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Vec<TelemetryEvent>, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<TelemetryEvent>, BoxError>> + Send + 'static,
    {
        self.plugin.export.before_export = Some(hook_fn(f));
        self
    }

    pub fn after_export<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ExportResult, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExportResult, BoxError>> + Send + 'static,
    {
        self.plugin.export.after_export = Some(hook_fn(f));
        self
    }

    pub fn on_export_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ExportFailure, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.plugin.export.on_export_error = Some(hook_fn(f));
        self
    }

    pub fn before_analytics<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.plugin.analytics.before_analytics = Some(hook_fn(f));
        self
    }

    pub fn after_analytics<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.plugin.analytics.after_analytics = Some(hook_fn(f));
        self
    }

    pub fn custom_hook<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.plugin.custom.insert(name.into(), hook_fn(f));
        self
    }

    pub fn storage_provider<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ProviderRegistrar) + Send + Sync + 'static,
    {
        self.plugin.register_storage_provider = Some(Arc::new(f));
        self
    }

    pub fn exporter<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ExporterRegistrar) + Send + Sync + 'static,
    {
        self.plugin.register_exporter = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Plugin {
        self.plugin
    }
}
