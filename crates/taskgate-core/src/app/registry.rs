//! PluginRegistry - plugin factories keyed by kind.
//!
//! Two layers, like a typed handler registry:
//! - **typed**: `PluginFactory` with an associated `Config` type
//! - **dyn**: `DynFactory`, object-safe, takes the config as JSON
//!
//! `TypedFactory<F>` bridges the two so factories of different config types
//! live in one `HashMap<String, Arc<dyn DynFactory>>`.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::config::PluginSpec;
use crate::domain::{ConfigError, PluginError};
use crate::ports::{Plugin, PluginConfig, PluginFactory};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin kind '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("plugin kind '{0}' is not registered")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to construct plugin: {0}")]
    Construct(#[from] PluginError),
}

/// Object-safe plugin factory.
pub trait DynFactory: Send + Sync {
    fn kind(&self) -> &str;

    /// Decode `config`, validate it against `pipeline_names`, build the plugin.
    fn construct_dyn(
        &self,
        config: serde_json::Value,
        pipeline_names: &[String],
    ) -> Result<Arc<dyn Plugin>, RegistryError>;
}

pub struct TypedFactory<F: PluginFactory> {
    factory: F,
    _marker: PhantomData<fn() -> F::Config>,
}

impl<F: PluginFactory> TypedFactory<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _marker: PhantomData,
        }
    }
}

impl<F: PluginFactory> DynFactory for TypedFactory<F> {
    fn kind(&self) -> &str {
        F::KIND
    }

    fn construct_dyn(
        &self,
        config: serde_json::Value,
        pipeline_names: &[String],
    ) -> Result<Arc<dyn Plugin>, RegistryError> {
        let config: F::Config = serde_json::from_value(config)
            .map_err(|e| ConfigError::Parse(format!("{} config: {e}", F::KIND)))?;
        config.prepare(pipeline_names)?;
        debug!(kind = F::KIND, plugin = config.plugin_name(), "constructing plugin");
        Ok(self.factory.construct(config)?)
    }
}

/// Registry of plugin factories.
///
/// Built during initialization, read-only afterwards.
#[derive(Default)]
pub struct PluginRegistry {
    factories: HashMap<String, Arc<dyn DynFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F: PluginFactory>(&mut self, factory: F) -> Result<(), RegistryError> {
        let kind = F::KIND.to_string();
        if self.factories.contains_key(&kind) {
            return Err(RegistryError::AlreadyRegistered(kind));
        }
        self.factories.insert(kind, Arc::new(TypedFactory::new(factory)));
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn DynFactory>> {
        self.factories.get(kind).cloned()
    }

    pub fn construct(
        &self,
        spec: &PluginSpec,
        pipeline_names: &[String],
    ) -> Result<Arc<dyn Plugin>, RegistryError> {
        let factory = self
            .get(&spec.kind)
            .ok_or_else(|| RegistryError::NotFound(spec.kind.clone()))?;
        factory.construct_dyn(spec.config.clone(), pipeline_names)
    }

    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
