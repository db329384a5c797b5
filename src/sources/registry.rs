//! Constructors for source adapters, keyed by [`SourceKind`].

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use super::adapter::{AdapterError, SourceAdapter};
use super::config::{SourceConfig, SourceKind};

/// Builds an adapter from its source name and typed configuration.
pub type AdapterConstructor = Box<
    dyn Fn(&str, &SourceConfig) -> Result<Box<dyn SourceAdapter>, AdapterError> + Send + Sync,
>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no adapter registered for kind '{0}'")]
    NotRegistered(SourceKind),

    #[error("invalid configuration for source '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("failed to build adapter for source '{name}'")]
    Build {
        name: String,
        #[source]
        error: AdapterError,
    },
}

/// Registry of adapter constructors.
#[derive(Default)]
pub struct AdapterRegistry {
    constructors: HashMap<SourceKind, AdapterConstructor>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for a kind.
    pub fn register<F>(&mut self, kind: SourceKind, constructor: F)
    where
        F: Fn(&str, &SourceConfig) -> Result<Box<dyn SourceAdapter>, AdapterError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
    }

    pub fn is_registered(&self, kind: SourceKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Build the adapter for a named source.
    pub fn build(
        &self,
        name: &str,
        config: &SourceConfig,
    ) -> Result<Box<dyn SourceAdapter>, RegistryError> {
        let kind = config.kind();
        let constructor = self
            .constructors
            .get(&kind)
            .ok_or(RegistryError::NotRegistered(kind))?;

        config
            .validate()
            .map_err(|reason| RegistryError::InvalidConfig {
                name: name.to_string(),
                reason,
            })?;

        debug!(source = %name, kind = %kind, "Building source adapter");
        constructor(name, config).map_err(|error| RegistryError::Build {
            name: name.to_string(),
            error,
        })
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}
