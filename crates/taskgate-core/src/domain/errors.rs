//! Errors - エラー型と分類
//!
//! 関心ごとに thiserror の enum を分けています。
//!
//! # 分類
//! - **CancelError**: キャンセル理由（外部キャンセル / deadline 超過）
//! - **TaskError**: driver 向け操作の状態遷移違反
//! - **PluginError**: プラグインの `run` が返すエラー（再構築が必要 / キャンセル）
//! - **ConfigError**: プラグイン設定の検証・パース失敗
//!
//! ユーザー入力起因のエラーはここに含めず、`Task::set_error` かタスク値で表現します。

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use super::status::TaskStatus;

/// A task error as recorded by `Task::set_error`.
///
/// Shared so accessors can hand it out without giving up the task's copy.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Why a task was cancelled.
///
/// The two variants are the process-wide cancellation sentinels; they are
/// `Copy` constants and compare by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CancelError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors returned by driver-facing task operations.
///
/// Plugin-facing operations (`finish`, `set_error`) never return these; they
/// treat contract violations as no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("invalid task transition {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("task already finished")]
    AlreadyFinished,
}

/// Errors a plugin returns from `run`.
///
/// Only two things are reported this way: the plugin instance is broken and
/// must be rebuilt, or the task was cancelled under it. Everything caused by
/// user input goes through `Task::set_error` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    #[error("plugin needs reconstruction: {0}")]
    NeedsReconstruction(String),

    #[error("task cancelled: {0}")]
    Cancelled(#[from] CancelError),
}

/// Errors raised while validating a plugin config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config for plugin {plugin}: {reason}")]
    Invalid { plugin: String, reason: String },

    #[error("config parse error: {0}")]
    Parse(String),
}

/// Convert anything error-like into a [`SharedError`].
pub fn shared_error<E>(err: E) -> SharedError
where
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    Arc::from(err.into())
}
