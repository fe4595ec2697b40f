//! Plugins with scripted behaviour for driver, registry and builder tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::app::PipelineContext;
use crate::domain::{CancelError, ConfigError, PluginError, TaskResultCode};
use crate::ports::{Plugin, PluginConfig, PluginFactory};
use crate::task::Task;

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Pass,
    Finish,
    SetError(&'static str, u32),
    Fail(PluginError),
    WaitForCancel,
    CancelTask,
    /// Record an error, then bail out as if cancelled mid-run.
    ErrorThenCancelled(&'static str, u32),
}

pub(crate) struct ScriptedPlugin {
    name: String,
    step: Step,
    journal: Arc<Mutex<Vec<String>>>,
    prepares: AtomicUsize,
    runs: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedPlugin {
    pub(crate) fn new(name: &str, step: Step) -> Self {
        Self {
            name: name.to_string(),
            step,
            journal: Arc::new(Mutex::new(Vec::new())),
            prepares: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn ok(name: &str) -> Self {
        Self::new(name, Step::Pass)
    }

    /// Share one journal between plugins to observe run order.
    pub(crate) fn journal(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = journal;
        self
    }

    pub(crate) fn prepare_count(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub(crate) fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, _ctx: &PipelineContext) {
        self.prepares.fetch_add(1, Ordering::SeqCst);
    }

    async fn run(&self, _ctx: &PipelineContext, task: &Task) -> Result<(), PluginError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push(self.name.clone());
        match &self.step {
            Step::Pass => Ok(()),
            Step::Finish => {
                task.finish();
                Ok(())
            }
            Step::SetError(message, code) => {
                task.set_error(*message, TaskResultCode(*code));
                Ok(())
            }
            Step::Fail(err) => Err(err.clone()),
            Step::WaitForCancel => Err(PluginError::Cancelled(task.cancel().cancelled().await)),
            Step::CancelTask => {
                task.request_cancel();
                Ok(())
            }
            Step::ErrorThenCancelled(message, code) => {
                task.set_error(*message, TaskResultCode(*code));
                task.request_cancel();
                Err(PluginError::Cancelled(CancelError::Canceled))
            }
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScriptedConfig {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) finish: bool,
    /// Pipelines the plugin may be used in; empty means any.
    #[serde(default)]
    pub(crate) pipelines: Vec<String>,
}

impl PluginConfig for ScriptedConfig {
    fn plugin_name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, pipeline_names: &[String]) -> Result<(), ConfigError> {
        if self.pipelines.is_empty() {
            return Ok(());
        }
        match pipeline_names.iter().find(|p| !self.pipelines.contains(p)) {
            Some(p) => Err(ConfigError::Invalid {
                plugin: self.name.clone(),
                reason: format!("not allowed in pipeline {p}"),
            }),
            None => Ok(()),
        }
    }
}

pub(crate) struct ScriptedFactory;

impl PluginFactory for ScriptedFactory {
    type Config = ScriptedConfig;
    const KIND: &'static str = "scripted";

    fn construct(&self, config: ScriptedConfig) -> Result<Arc<dyn Plugin>, PluginError> {
        let step = if config.finish { Step::Finish } else { Step::Pass };
        Ok(Arc::new(ScriptedPlugin::new(&config.name, step)))
    }
}

/// Factory that always refuses to build.
pub(crate) struct BrokenFactory;

impl PluginFactory for BrokenFactory {
    type Config = ScriptedConfig;
    const KIND: &'static str = "broken";

    fn construct(&self, _config: ScriptedConfig) -> Result<Arc<dyn Plugin>, PluginError> {
        Err(PluginError::NeedsReconstruction("backend unavailable".into()))
    }
}
