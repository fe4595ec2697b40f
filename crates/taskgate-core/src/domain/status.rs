//! TaskStatus - タスクの状態機械
//!
//! 遷移表は `can_transition_to` の 1 箇所だけにあり、`Task` の全操作がこれを通ります。
//! `rank` は状態機械上の位置で、後戻りできるのはリカバリー辺だけです。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Pending -> Running
/// - Running -> Finishing -> Finished (a plugin asked to end the pipeline normally)
/// - Running -> ResponseImmediately -> Finished (a plugin reported an error)
/// - ResponseImmediately -> Running (recovered by a recovery callback)
///
/// `Pending -> Finishing` and `Pending -> ResponseImmediately` are allowed as well,
/// a task may be finished or failed before the driver started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created, not yet handed to the first plugin.
    Pending,

    /// Plugins are being invoked.
    Running,

    /// A plugin reported an error, the driver should respond right away.
    ResponseImmediately,

    /// A plugin asked the pipeline to stop normally.
    Finishing,

    /// Terminal.
    Finished,
}

impl TaskStatus {
    /// Is this the terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished)
    }

    /// Will the task reach `Finished` without running further plugins
    /// (unless recovered)?
    pub fn is_terminal_bound(self) -> bool {
        matches!(
            self,
            TaskStatus::ResponseImmediately | TaskStatus::Finishing | TaskStatus::Finished
        )
    }

    /// Position along the state machine. Only the recovery edge goes backwards.
    pub(crate) fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            TaskStatus::ResponseImmediately | TaskStatus::Finishing => 2,
            TaskStatus::Finished => 3,
        }
    }

    /// Is `self -> next` an edge of the state machine?
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending | Running, Finishing)
                | (Pending | Running | Finishing, ResponseImmediately)
                | (ResponseImmediately, Running)
                | (Pending | Running | ResponseImmediately | Finishing, Finished)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::ResponseImmediately => "ResponseImmediately",
            TaskStatus::Finishing => "Finishing",
            TaskStatus::Finished => "Finished",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque result classifier set together with a task error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskResultCode(pub u32);

impl TaskResultCode {
    /// No result recorded.
    pub const NONE: TaskResultCode = TaskResultCode(0);

    /// Used by the reference driver when a plugin's `run` itself failed.
    pub const PLUGIN_FAILURE: TaskResultCode = TaskResultCode(500);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl From<u32> for TaskResultCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl fmt::Display for TaskResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
