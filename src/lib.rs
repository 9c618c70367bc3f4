//! GG-TELEMETRY
//!
//! A telemetry event pipeline: events are enriched, sanitized, passed
//! through plugin hooks and fanned out to every configured storage
//! provider, tolerating partial backend failure.
//!
//! # Pipeline
//!
//! ```text
//! track -> enrich -> sanitize -> rate limit -> beforeTrack/afterTrack
//!       -> store on every provider (circuit breaker + storage hooks)
//!       -> stream -> analytics -> event:tracked
//! ```
//!
//! # Extension Points
//!
//! - Plugins: typed hooks for track, storage, query, export and analytics,
//!   plus named custom hooks ([`plugin::Plugin::builder`])
//! - Storage: any [`storage::StorageProvider`], registered by type name
//! - Export: any [`export::Exporter`], selected by format name

pub mod analytics;
pub mod cli;
pub mod config;
pub mod event;
pub mod export;
pub mod observability;
pub mod plugin;
pub mod reliability;
pub mod security;
pub mod service;
pub mod storage;
pub mod streaming;

pub use config::{ConfigError, StorageConfig, TelemetryConfig};
pub use event::{EventContext, EventType, NewEvent, QueryFilter, SessionStatus, TelemetryEvent, TimeRange};
pub use export::{ExportResult, Exporter};
pub use plugin::{
    BoxError, HookCategory, HookContext, HookError, HookOptions, Plugin, PluginError, PluginManager,
};
pub use service::{
    HealthReport, HealthState, ProviderFailure, ServiceEvent, TelemetryError, TelemetryMetrics,
    TelemetryService,
};
pub use storage::{StorageError, StorageProvider, StorageStats};
