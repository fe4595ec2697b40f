//! Task values - タスクスコープの key/value ストア
//!
//! Keys are strings, values are type-erased. Readers either take the
//! `Arc<dyn Any>` as is or downcast with [`ValueStore::get_as`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

pub type TaskValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub(crate) struct ValueStore {
    values: HashMap<String, TaskValue>,
}

impl ValueStore {
    /// Last write wins.
    pub(crate) fn insert(&mut self, key: String, value: TaskValue) {
        self.values.insert(key, value);
    }

    pub(crate) fn get(&self, key: &str) -> Option<TaskValue> {
        self.values.get(key).cloned()
    }

    /// `None` if the key is missing or holds another type.
    pub(crate) fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key)?.downcast::<T>().ok()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }
}
