//! Storage type name to constructor mapping.

use std::collections::HashMap;
use std::sync::Arc;

use super::memory::{InMemoryStorage, DEFAULT_MAX_EVENTS};
use super::{StorageError, StorageProvider};
use crate::config::StorageConfig;

/// Builds a provider from its configuration entry.
pub type StorageFactory =
    Arc<dyn Fn(&StorageConfig) -> Result<Arc<dyn StorageProvider>, StorageError> + Send + Sync>;

/// Registry of storage factories, keyed by the `type` of a storage entry.
#[derive(Clone)]
pub struct StorageRegistry {
    factories: HashMap<String, StorageFactory>,
}

impl StorageRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry that knows the built-in `memory` type.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", Arc::new(memory_factory));
        registry
    }

    /// Add or replace the factory for `storage_type`.
    pub fn register(&mut self, storage_type: impl Into<String>, factory: StorageFactory) {
        let storage_type = storage_type.into();
        if self.factories.insert(storage_type.clone(), factory).is_some() {
            tracing::debug!(storage_type = %storage_type, "storage factory replaced");
        }
    }

    pub fn contains(&self, storage_type: &str) -> bool {
        self.factories.contains_key(storage_type)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn create(&self, config: &StorageConfig) -> Result<Arc<dyn StorageProvider>, StorageError> {
        let factory = self
            .factories
            .get(&config.storage_type)
            .ok_or_else(|| StorageError::UnknownType(config.storage_type.clone()))?;
        factory(config)
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn memory_factory(config: &StorageConfig) -> Result<Arc<dyn StorageProvider>, StorageError> {
    let name = config
        .options
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("memory");
    let max_events = match config.options.get("maxEvents") {
        None => DEFAULT_MAX_EVENTS,
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .ok_or_else(|| StorageError::backend(name, format!("invalid maxEvents: {v}")))?
            as usize,
    };
    Ok(Arc::new(InMemoryStorage::with_capacity(name, max_events)))
}
