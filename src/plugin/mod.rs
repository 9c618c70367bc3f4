//! Plugin system: typed hook definitions, the category-agnostic executor
//! and the manager that owns plugin lifecycle.

mod context;
mod definition;
mod error;
mod executor;
mod manager;

pub use context::{hook_fn, names, returns_value, HookCategory, HookContext, HookFn, HookOptions, HookResult};
pub use definition::{
    AnalyticsHooks, DeleteReport, ExportFailure, ExportHooks, ExporterRegistrar, Plugin, PluginBuilder,
    PluginEnvironment, ProviderRegistrar, QueryFailure, QueryHooks, StorageFailure, StorageHooks,
    StoreReport,
};
pub use error::{BoxError, HookError, PluginError};
pub use executor::{HookExecutor, HookStats};
pub use manager::PluginManager;
