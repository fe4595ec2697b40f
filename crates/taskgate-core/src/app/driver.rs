//! PipelineDriver - runs one task through a flat list of plugins.
//!
//! # Flow
//! 1. `Task::start` (Pending -> Running)
//! 2. For each plugin in order:
//!    - stop if the task was cancelled
//!    - prepare the plugin once in this pipeline context
//!    - `Plugin::run`
//!    - `Finishing`: stop
//!    - `ResponseImmediately`: recovery pass; recovered -> next plugin, else stop
//! 3. `Task::finalize` (finish callbacks run here)
//!
//! キャンセルはリカバリーより優先されます。プラグインが `set_error` の後に
//! `PluginError::Cancelled` を返した場合、recovery callback は呼ばれず、
//! タスクは記録済みのエラーのまま `ResponseImmediately` から finalize されます。

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::PipelineContext;
use super::status::TaskStatusView;
use crate::config::TaskBudget;
use crate::domain::{PluginError, TaskError, TaskResultCode, TaskStatus};
use crate::ports::{Clock, Plugin};
use crate::task::Task;

pub struct PipelineDriver {
    pub(super) context: Arc<PipelineContext>,
    pub(super) plugins: Vec<Arc<dyn Plugin>>,
    pub(super) budget: TaskBudget,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) value_preview_len: usize,
}

impl PipelineDriver {
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// A fresh `Pending` task carrying this pipeline's budget and clock.
    pub fn new_task(&self) -> Task {
        self.budget
            .apply(Task::builder().clock(Arc::clone(&self.clock)))
            .build()
    }

    /// Drive `task` through the pipeline and finalize it.
    ///
    /// Returns the status the task had right before `Finished`. Fails only if
    /// the task was not `Pending` or was finalized behind the driver's back.
    pub async fn run(&self, task: &Task) -> Result<TaskStatus, TaskError> {
        task.start()?;
        let pipeline = self.context.pipeline_name();

        for plugin in &self.plugins {
            if let Some(cause) = task.cancel_cause() {
                info!(pipeline, task_id = %task.id(), %cause, "pipeline stopped, task cancelled");
                break;
            }

            self.context.ensure_prepared(plugin.as_ref()).await;

            match plugin.run(&self.context, task).await {
                Ok(()) => {}
                Err(PluginError::Cancelled(cause)) => {
                    // recovery is not consulted on cancellation
                    info!(pipeline, task_id = %task.id(), plugin = plugin.name(), %cause, "plugin left on cancellation");
                    break;
                }
                Err(err) => {
                    warn!(pipeline, task_id = %task.id(), plugin = plugin.name(), error = %err, "plugin failed");
                    task.set_error(err, TaskResultCode::PLUGIN_FAILURE);
                }
            }

            match task.status() {
                TaskStatus::Finishing => {
                    debug!(pipeline, task_id = %task.id(), plugin = plugin.name(), "plugin finished the pipeline");
                    break;
                }
                TaskStatus::ResponseImmediately => {
                    if !task.run_recovery(plugin.name()) {
                        break;
                    }
                }
                TaskStatus::Finished => {
                    return Err(TaskError::AlreadyFinished);
                }
                TaskStatus::Pending | TaskStatus::Running => {}
            }
        }

        let original_status = task.finalize()?;
        debug!(
            pipeline,
            view = ?TaskStatusView::capture(task, self.value_preview_len),
            "task done"
        );
        Ok(original_status)
    }

    /// Tear down every plugin.
    pub async fn close(&self) {
        for plugin in &self.plugins {
            plugin.close().await;
        }
        debug!(pipeline = self.context.pipeline_name(), "pipeline closed");
    }
}
