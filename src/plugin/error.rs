//! Plugin and hook error types.

use thiserror::Error;

/// Error type plugin callbacks return. Any `std::error::Error` converts
/// into it with `?`, as do `&str` and `String`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single hook invocation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("hook {hook} of plugin {plugin} timed out after {timeout_ms}ms")]
    Timeout {
        plugin: String,
        hook: String,
        timeout_ms: u64,
    },

    #[error("hook {hook} of plugin {plugin} failed: {message}")]
    Failed {
        plugin: String,
        hook: String,
        message: String,
    },

    #[error("hook {hook} of plugin {plugin} panicked")]
    Panicked { plugin: String, hook: String },

    #[error("hook {hook} of plugin {plugin} has an incompatible signature")]
    SignatureMismatch { plugin: String, hook: String },
}

impl HookError {
    pub fn plugin(&self) -> &str {
        match self {
            Self::Timeout { plugin, .. }
            | Self::Failed { plugin, .. }
            | Self::Panicked { plugin, .. }
            | Self::SignatureMismatch { plugin, .. } => plugin,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Plugin lifecycle errors.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin already registered: {0}")]
    AlreadyRegistered(String),

    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin {name} failed to initialize: {reason}")]
    InitializationFailed { name: String, reason: String },

    #[error("event rejected by plugin {plugin}")]
    Rejected { plugin: String },

    #[error(transparent)]
    Hook(#[from] HookError),
}
