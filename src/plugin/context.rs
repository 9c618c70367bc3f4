//! Hook invocation context, options and per-invocation results.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{BoxError, HookError};

/// Pipeline stage a hook attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookCategory {
    /// Legacy `beforeTrack`/`afterTrack` path.
    Track,
    Storage,
    Query,
    Export,
    Analytics,
    Custom,
}

impl HookCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Storage => "storage",
            Self::Query => "query",
            Self::Export => "export",
            Self::Analytics => "analytics",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for HookCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known hook names.
pub mod names {
    pub const BEFORE_TRACK: &str = "beforeTrack";
    pub const AFTER_TRACK: &str = "afterTrack";

    pub const BEFORE_STORE: &str = "beforeStore";
    pub const AFTER_STORE: &str = "afterStore";
    pub const ON_STORAGE_ERROR: &str = "onStorageError";
    pub const BEFORE_DELETE: &str = "beforeDelete";
    pub const AFTER_DELETE: &str = "afterDelete";

    pub const BEFORE_QUERY: &str = "beforeQuery";
    pub const AFTER_QUERY: &str = "afterQuery";
    pub const ON_QUERY_ERROR: &str = "onQueryError";
    pub const TRANSFORM_QUERY_RESULT: &str = "transformQueryResult";

    pub const BEFORE_EXPORT: &str = "beforeExport";
    pub const AFTER_EXPORT: &str = "afterExport";
    pub const ON_EXPORT_ERROR: &str = "onExportError";

    pub const BEFORE_ANALYTICS: &str = "beforeAnalytics";
    pub const AFTER_ANALYTICS: &str = "afterAnalytics";
}

/// Whether a hook name yields a value to the caller. `before*`, `after*`
/// and anything mentioning `transform` do; everything else is an observer.
pub fn returns_value(hook: &str) -> bool {
    hook.starts_with("before")
        || hook.starts_with("after")
        || hook.to_ascii_lowercase().contains("transform")
}

/// Describes one hook firing. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct HookContext {
    pub category: HookCategory,
    pub hook: String,
    /// Plugin receiving this invocation.
    pub plugin: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl HookContext {
    pub fn new(category: HookCategory, hook: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            category,
            hook: hook.into(),
            plugin: String::new(),
            timestamp: Utc::now(),
            metadata,
        }
    }

    pub(crate) fn for_plugin(&self, plugin: &str) -> Self {
        let mut ctx = self.clone();
        ctx.plugin = plugin.to_string();
        ctx
    }

    /// Storage provider the hook fires for, if any.
    pub fn provider(&self) -> Option<&str> {
        self.metadata.get("provider").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }
}

/// Execution policy for one `execute_hooks` call.
#[derive(Debug, Clone)]
pub struct HookOptions {
    pub continue_on_error: bool,
    /// Per-invocation deadline.
    pub timeout: Duration,
    pub parallel: bool,
    pub skip_plugins: Vec<String>,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            timeout: Duration::from_millis(5000),
            parallel: false,
            skip_plugins: Vec::new(),
        }
    }
}

impl HookOptions {
    pub fn strict(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn skip(mut self, plugin: impl Into<String>) -> Self {
        self.skip_plugins.push(plugin.into());
        self
    }
}

/// Outcome of one plugin's hook invocation.
#[derive(Debug)]
pub struct HookResult<R> {
    pub plugin: String,
    pub hook: String,
    pub duration: Duration,
    pub outcome: Result<R, HookError>,
}

impl<R> HookResult<R> {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// A typed hook callback.
pub type HookFn<A, R> =
    Arc<dyn Fn(A, HookContext) -> BoxFuture<'static, Result<R, BoxError>> + Send + Sync>;

/// Wrap an async closure as a [`HookFn`].
pub fn hook_fn<A, R, F, Fut>(f: F) -> HookFn<A, R>
where
    F: Fn(A, HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    Arc::new(move |args, ctx| f(args, ctx).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_returning_hook_names() {
        assert!(returns_value(names::BEFORE_STORE));
        assert!(returns_value(names::AFTER_QUERY));
        assert!(returns_value(names::TRANSFORM_QUERY_RESULT));
        assert!(returns_value("applyTransform"));
        assert!(!returns_value(names::ON_STORAGE_ERROR));
        assert!(!returns_value("notify"));
    }

    #[test]
    fn test_default_options() {
        let options = HookOptions::default();
        assert!(options.continue_on_error);
        assert!(!options.parallel);
        assert_eq!(options.timeout, Duration::from_millis(5000));
        assert!(options.skip_plugins.is_empty());
    }

    #[test]
    fn test_context_exposes_provider() {
        let mut metadata = Map::new();
        metadata.insert("provider".into(), Value::from("memory"));
        let ctx = HookContext::new(HookCategory::Storage, names::BEFORE_STORE, metadata);
        assert_eq!(ctx.provider(), Some("memory"));
        assert_eq!(ctx.for_plugin("audit").plugin, "audit");
    }
}
