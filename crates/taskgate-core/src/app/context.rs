//! PipelineContext - per-pipeline state shared by every task run through it.

use std::collections::HashSet;

use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::PipelineId;
use crate::ports::{IdGenerator, Plugin, SystemClock, UlidGenerator};

/// Context a pipeline's plugins are prepared and run in.
///
/// Tracks which plugins were already prepared so `Plugin::prepare` runs once
/// per (context, plugin) pair, before the plugin's first `run`.
pub struct PipelineContext {
    id: PipelineId,
    pipeline_name: String,
    plugin_names: Vec<String>,
    prepared: Mutex<HashSet<String>>,
}

impl PipelineContext {
    pub fn new(pipeline_name: impl Into<String>, plugin_names: Vec<String>) -> Self {
        Self::with_id(
            UlidGenerator::new(SystemClock).generate_pipeline_id(),
            pipeline_name,
            plugin_names,
        )
    }

    pub fn with_id(id: PipelineId, pipeline_name: impl Into<String>, plugin_names: Vec<String>) -> Self {
        Self {
            id,
            pipeline_name: pipeline_name.into(),
            plugin_names,
            prepared: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn plugin_names(&self) -> &[String] {
        &self.plugin_names
    }

    /// Prepare `plugin` unless it was already prepared in this context.
    ///
    /// Concurrent callers are serialized, so nobody runs a plugin whose
    /// preparation is still in flight. `prepare` must not call back into
    /// [`prepared_plugins`](Self::prepared_plugins).
    pub async fn ensure_prepared(&self, plugin: &dyn Plugin) -> bool {
        let mut prepared = self.prepared.lock().await;
        if prepared.contains(plugin.name()) {
            return false;
        }
        plugin.prepare(self).await;
        prepared.insert(plugin.name().to_string());
        debug!(pipeline = %self.pipeline_name, plugin = plugin.name(), "plugin prepared");
        true
    }

    pub async fn prepared_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prepared.lock().await.iter().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("id", &format_args!("{}", self.id))
            .field("pipeline_name", &self.pipeline_name)
            .field("plugin_names", &self.plugin_names)
            .finish_non_exhaustive()
    }
}
