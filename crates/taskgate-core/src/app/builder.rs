//! DriverBuilder - パイプラインの構築とワイヤリング
//!
//! - プラグインを直接渡す (`plugin`) か、`PluginRegistry` + `GatewayConfig` から組み立てる (`from_config`)
//! - 起動時検証（Fail-fast）: `expect_plugins` で期待したプラグインが揃っていなければ `BuildError`
//! - 同名プラグインの重複も build 時に弾く

use std::collections::HashSet;
use std::sync::Arc;

use super::context::PipelineContext;
use super::driver::PipelineDriver;
use super::registry::{PluginRegistry, RegistryError};
use crate::config::{GatewayConfig, TaskBudget};
use crate::ports::{Clock, Plugin, SystemClock};

/// ```ignore
/// let driver = DriverBuilder::new("api")
///     .plugin(Arc::new(AuthPlugin::new()))
///     .plugin(Arc::new(ProxyPlugin::new()))
///     .expect_plugins(&["auth", "proxy"])
///     .build()?;
/// ```
pub struct DriverBuilder {
    pipeline_name: String,
    plugins: Vec<Arc<dyn Plugin>>,
    expected_plugins: Option<Vec<String>>,
    budget: TaskBudget,
    value_preview_len: usize,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing plugins: {0:?}. These plugins were expected but not configured.")]
    MissingPlugins(Vec<String>),

    #[error("plugin '{0}' appears more than once in the pipeline")]
    DuplicatePlugin(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DriverBuilder {
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        let defaults = GatewayConfig::default();
        Self {
            pipeline_name: pipeline_name.into(),
            plugins: Vec::new(),
            expected_plugins: None,
            budget: defaults.budget,
            value_preview_len: defaults.value_preview_len,
            clock: Arc::new(SystemClock),
        }
    }

    /// Construct every plugin listed in `config` through `registry`.
    ///
    /// Each plugin config is validated against this pipeline before its
    /// plugin is built; the first failure aborts.
    pub fn from_config(
        registry: &PluginRegistry,
        config: &GatewayConfig,
        pipeline_name: impl Into<String>,
    ) -> Result<Self, BuildError> {
        let mut builder = Self::new(pipeline_name).config(config);
        let pipeline_names = vec![builder.pipeline_name.clone()];
        for spec in &config.plugins {
            let plugin = registry.construct(spec, &pipeline_names)?;
            builder = builder.plugin(plugin);
        }
        Ok(builder)
    }

    /// Append a plugin; plugins run in the order they were added.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn expect_plugins(mut self, names: &[&str]) -> Self {
        self.expected_plugins = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Take budget and preview settings from `config`. Plugin specs are ignored.
    pub fn config(mut self, config: &GatewayConfig) -> Self {
        self.budget = config.budget.clone();
        self.value_preview_len = config.value_preview_len;
        self
    }

    pub fn budget(mut self, budget: TaskBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<PipelineDriver, BuildError> {
        let mut seen = HashSet::new();
        for plugin in &self.plugins {
            if !seen.insert(plugin.name()) {
                return Err(BuildError::DuplicatePlugin(plugin.name().to_string()));
            }
        }

        if let Some(expected) = &self.expected_plugins {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !seen.contains(name.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingPlugins(missing));
            }
        }

        let plugin_names = self.plugins.iter().map(|p| p.name().to_string()).collect();
        Ok(PipelineDriver {
            context: Arc::new(PipelineContext::new(self.pipeline_name, plugin_names)),
            plugins: self.plugins,
            budget: self.budget,
            clock: self.clock,
            value_preview_len: self.value_preview_len,
        })
    }
}
