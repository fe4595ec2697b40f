//! Gateway configuration: task budget, status view settings, plugin specs.
//!
//! Open-ended plugin configs stay as `serde_json::Value`; each plugin factory
//! decodes its own typed config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;
use crate::task::TaskBuilder;

pub const DEFAULT_VALUE_PREVIEW_LEN: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub budget: TaskBudget,

    /// Max characters of each task value shown in status views.
    #[serde(default = "default_value_preview_len")]
    pub value_preview_len: usize,

    /// Plugins of the pipeline, in run order.
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

fn default_value_preview_len() -> usize {
    DEFAULT_VALUE_PREVIEW_LEN
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            budget: TaskBudget::default(),
            value_preview_len: DEFAULT_VALUE_PREVIEW_LEN,
            plugins: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Per-task limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBudget {
    /// Deadline relative to task start. `None` means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl TaskBudget {
    pub fn apply(&self, builder: TaskBuilder) -> TaskBuilder {
        match self.deadline_ms {
            Some(ms) => builder.timeout(Duration::from_millis(ms)),
            None => builder,
        }
    }
}

/// One plugin of a pipeline: the factory kind and its raw config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub kind: String,

    #[serde(default)]
    pub config: serde_json::Value,
}
