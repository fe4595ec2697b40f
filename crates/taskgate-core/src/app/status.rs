//! TaskStatusView - serializable snapshot of a task for logs and responses.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskResultCode, TaskStatus, render_value};
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result_code: TaskResultCode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub start_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_cause: Option<String>,

    /// Task values rendered for display, truncated to the preview length.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, String>,
}

impl TaskStatusView {
    pub fn capture(task: &Task, value_preview_len: usize) -> Self {
        let values = task
            .value_keys()
            .into_iter()
            .filter_map(|key| {
                let value = task.value(&key)?;
                let rendered = render_value(&*value, value_preview_len);
                Some((key, rendered))
            })
            .collect();

        Self {
            task_id: task.id(),
            status: task.status(),
            result_code: task.result_code(),
            error: task.error().map(|e| e.to_string()),
            start_at: task.start_at(),
            finish_at: task.finish_at(),
            deadline: task.deadline(),
            cancel_cause: task.cancel_cause().map(|c| c.to_string()),
            values,
        }
    }
}
