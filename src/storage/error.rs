//! Storage error types.

use thiserror::Error;

use crate::event::FilterError;
use crate::plugin::HookError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage provider {0} is not initialized")]
    NotInitialized(String),

    #[error("storage provider {0} does not support queries")]
    QueryNotSupported(String),

    #[error("invalid query filter: {0}")]
    InvalidFilter(#[from] FilterError),

    #[error("unknown storage type: {0}")]
    UnknownType(String),

    #[error("{provider}: {message}")]
    Backend { provider: String, message: String },

    #[error("circuit open for storage provider {0}")]
    CircuitOpen(String),

    #[error(transparent)]
    Hook(#[from] HookError),
}

impl StorageError {
    pub fn backend(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Errors caused by asking a provider for something it cannot do.
    /// These are never retried.
    pub fn is_capability_error(&self) -> bool {
        matches!(self, Self::QueryNotSupported(_) | Self::UnknownType(_) | Self::InvalidFilter(_))
    }
}
