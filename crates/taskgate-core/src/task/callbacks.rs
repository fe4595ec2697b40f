//! Callbacks - 終了通知とリカバリー
//!
//! - **FinishedCallback**: `Finished` への遷移時に 1 回だけ呼ばれる
//! - **RecoveryCallback**: `ResponseImmediately` に入ったとき、続行するかを判定する
//!
//! どちらも名前をキーに登録し、登録順に呼びます。クロージャはそのまま登録できます。

use std::sync::Arc;

use indexmap::IndexMap;

use super::Task;
use crate::domain::TaskStatus;

/// Notified once when a task reaches `Finished`.
///
/// `original_status` is the status right before the final transition, so a
/// callback can tell a normal finish (`Finishing`) from an error
/// short-circuit (`ResponseImmediately`).
pub trait FinishedCallback: Send + Sync {
    fn on_finished(&self, task: &Task, original_status: TaskStatus);
}

impl<F> FinishedCallback for F
where
    F: Fn(&Task, TaskStatus) + Send + Sync,
{
    fn on_finished(&self, task: &Task, original_status: TaskStatus) {
        self(task, original_status)
    }
}

/// Asked whether a task in `ResponseImmediately` can go back to `Running`.
///
/// `error_plugin_name` names the plugin that reported the error.
pub trait RecoveryCallback: Send + Sync {
    fn recover(&self, task: &Task, error_plugin_name: &str) -> bool;
}

impl<F> RecoveryCallback for F
where
    F: Fn(&Task, &str) -> bool + Send + Sync,
{
    fn recover(&self, task: &Task, error_plugin_name: &str) -> bool {
        self(task, error_plugin_name)
    }
}

/// Name-keyed callbacks iterated in registration order.
///
/// Re-registering a name replaces the callback and moves it to the end.
pub(crate) struct CallbackRegistry<C: ?Sized> {
    entries: IndexMap<String, Arc<C>>,
}

impl<C: ?Sized> CallbackRegistry<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Returns true if an existing callback was replaced.
    pub(crate) fn insert(&mut self, name: String, callback: Arc<C>) -> bool {
        let replaced = self.entries.shift_remove(&name).is_some();
        self.entries.insert(name, callback);
        replaced
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        self.entries.shift_remove(name).is_some()
    }

    /// Owned copy for a notification pass, so callbacks run without the task lock.
    pub(crate) fn snapshot(&self) -> Vec<(String, Arc<C>)> {
        self.entries
            .iter()
            .map(|(name, cb)| (name.clone(), Arc::clone(cb)))
            .collect()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}
