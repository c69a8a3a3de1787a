//! Collector registry: (platform, name) -> collector definition.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::collector::CollectorDefinition;
use crate::storage::{StorageError, normalize_table_name};

/// Errors raised while registering or resolving collectors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// (platform, name) registered twice.
    #[error("collector '{name}' is already registered for platform '{platform}'")]
    DuplicateCollector { platform: String, name: String },

    /// (platform, name) not registered.
    #[error("unknown collector '{name}' for platform '{platform}'")]
    UnknownCollector { platform: String, name: String },

    /// Definition rejected at registration.
    #[error("invalid definition for '{name}': {source}")]
    InvalidDefinition {
        name: String,
        #[source]
        source: StorageError,
    },
}

/// Lookup table of collector definitions.
///
/// Populated at startup, read-only afterwards; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct CollectorRegistry {
    collectors: BTreeMap<(String, String), Arc<CollectorDefinition>>,
}

impl CollectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition.
    ///
    /// # Errors
    /// `DuplicateCollector` if (platform, name) is already present,
    /// `InvalidDefinition` if the target table name cannot be stored.
    pub fn register(&mut self, definition: CollectorDefinition) -> Result<(), RegistryError> {
        let key = (
            definition.platform().to_string(),
            definition.name().to_string(),
        );
        if self.collectors.contains_key(&key) {
            return Err(RegistryError::DuplicateCollector {
                platform: key.0,
                name: key.1,
            });
        }

        let definition = definition
            .validated()
            .map_err(|source| RegistryError::InvalidDefinition {
                name: key.1.clone(),
                source,
            })?;

        tracing::debug!(
            platform = %key.0,
            collector = %key.1,
            table = %definition.table(),
            mode = %definition.write_mode(),
            "Collector registered"
        );
        self.collectors.insert(key, Arc::new(definition));
        Ok(())
    }

    /// Resolve a definition.
    pub fn resolve(
        &self,
        platform: &str,
        name: &str,
    ) -> Result<Arc<CollectorDefinition>, RegistryError> {
        self.collectors
            .get(&(platform.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCollector {
                platform: platform.to_string(),
                name: name.to_string(),
            })
    }

    /// Collector names of a platform, lexically sorted.
    pub fn list(&self, platform: &str) -> Vec<String> {
        self.collectors
            .keys()
            .filter(|(p, _)| p == platform)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Registered platforms, lexically sorted.
    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.collectors.keys().map(|(p, _)| p.clone()).collect();
        platforms.dedup();
        platforms
    }

    /// All definitions ordered by (platform, name).
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<CollectorDefinition>> {
        self.collectors.values()
    }

    /// Resource key declared by a collector that writes `table`.
    ///
    /// The first declaring definition in (platform, name) order wins.
    pub fn resource_key_for(&self, table: &str) -> Option<&[String]> {
        let table = normalize_table_name(table).ok()?;
        self.collectors
            .values()
            .filter(|definition| definition.table() == table)
            .find_map(|definition| definition.resource_key())
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
