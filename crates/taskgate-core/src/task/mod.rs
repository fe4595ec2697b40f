//! Task - パイプラインを流れるリクエスト単位の実行コンテキスト
//!
//! 1 リクエストにつき 1 つの Task が作られ、プラグイン列を順に通ります。
//! 状態遷移はすべて `TaskStatus::can_transition_to` で検査されます。
//!
//! The finite state machine of task status is:
//!
//! ```text
//!                   Pending
//!                      |
//!                      v
//!                   Running
//!                      |
//!          +-----------+-----------+
//!          v                       v
//! ResponseImmediately          Finishing
//!          |                       |
//!          +-----------+-----------+
//!                      v
//!                   Finished
//! ```
//!
//! plus one backward edge, `ResponseImmediately -> Running`, taken only when a
//! recovery callback heals the error.
//!
//! Plugins call the plugin-facing operations (`finish`, `set_error`, values,
//! callbacks, cancellation). The pipeline driver additionally calls `start`,
//! `run_recovery`, `finalize` and `request_cancel`.
//!
//! All state sits behind one mutex. Callbacks are always invoked with the lock
//! released, so they may read the task freely.

mod callbacks;
mod cancel;
mod values;

pub use callbacks::{FinishedCallback, RecoveryCallback};
pub use cancel::CancelHandle;
pub use values::TaskValue;

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{
    CancelError, SharedError, TaskError, TaskId, TaskResultCode, TaskStatus, shared_error,
};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use callbacks::CallbackRegistry;
use cancel::CancelSignal;
use values::ValueStore;

struct TaskState {
    status: TaskStatus,
    result_code: TaskResultCode,
    error: Option<SharedError>,
    finish_at: Option<DateTime<Utc>>,
    values: ValueStore,
    finished_callbacks: CallbackRegistry<dyn FinishedCallback>,
    recovery_callbacks: CallbackRegistry<dyn RecoveryCallback>,
}

impl TaskState {
    /// Every status change goes through here. Returns the previous status.
    fn transition(&mut self, to: TaskStatus) -> Result<TaskStatus, TaskError> {
        let from = self.status;
        if from.is_terminal() {
            return Err(TaskError::AlreadyFinished);
        }
        if !from.can_transition_to(to) {
            return Err(TaskError::InvalidTransition { from, to });
        }
        debug_assert!(
            to.rank() >= from.rank()
                || (from, to) == (TaskStatus::ResponseImmediately, TaskStatus::Running)
        );
        self.status = to;
        Ok(from)
    }
}

pub struct Task {
    id: TaskId,
    start_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    state: Mutex<TaskState>,
    cancel: CancelSignal,
}

impl Task {
    /// A task with no deadline on the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TaskBuilder {
        TaskBuilder::default()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn finished(&self) -> bool {
        self.status() == TaskStatus::Finished
    }

    pub fn result_code(&self) -> TaskResultCode {
        self.state.lock().result_code
    }

    pub fn error(&self) -> Option<SharedError> {
        self.state.lock().error.clone()
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start_at
    }

    /// `None` until the task is `Finished`.
    pub fn finish_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finish_at
    }

    /// Move `Pending -> Running`. Driver only.
    pub fn start(&self) -> Result<(), TaskError> {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Pending {
            return Err(TaskError::InvalidTransition {
                from: state.status,
                to: TaskStatus::Running,
            });
        }
        state.transition(TaskStatus::Running)?;
        debug!(task_id = %self.id, "task running");
        Ok(())
    }

    /// Ask the pipeline to stop normally.
    ///
    /// Moves `Pending`/`Running` to `Finishing`. Any other status is left as is:
    /// the task is already on its way to `Finished`.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            warn!(task_id = %self.id, "finish called on a finished task, ignored");
            return;
        }
        if state.status.is_terminal_bound() {
            return;
        }
        match state.transition(TaskStatus::Finishing) {
            Ok(from) => debug!(task_id = %self.id, %from, "task finishing"),
            Err(err) => warn!(task_id = %self.id, error = %err, "finish ignored"),
        }
    }

    /// Record a plugin failure and short-circuit the pipeline.
    ///
    /// Forces `ResponseImmediately` from any status except `Finished`, where
    /// the call is ignored. Not meant for user-input validation errors; report
    /// those through plugin-specific task values.
    pub fn set_error<E>(&self, err: E, result_code: TaskResultCode)
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        self.set_shared_error(shared_error(err), result_code);
    }

    /// [`set_error`](Self::set_error) with an already shared error.
    pub fn set_shared_error(&self, err: SharedError, result_code: TaskResultCode) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            warn!(task_id = %self.id, error = %err, "set_error called on a finished task, ignored");
            return;
        }
        if state.status != TaskStatus::ResponseImmediately {
            if let Err(transition) = state.transition(TaskStatus::ResponseImmediately) {
                warn!(task_id = %self.id, error = %err, %transition, "set_error ignored");
                return;
            }
        }
        debug!(
            task_id = %self.id,
            from = %state.status,
            result_code = %result_code,
            error = %err,
            "task error recorded"
        );
        state.error = Some(err);
        state.result_code = result_code;
    }

    /// Register a closure notified when the task reaches `Finished`.
    pub fn add_finished_callback<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&Task, TaskStatus) + Send + Sync + 'static,
    {
        self.add_finished_handler(name, Arc::new(callback));
    }

    /// Register a finish callback object.
    pub fn add_finished_handler(&self, name: impl Into<String>, callback: Arc<dyn FinishedCallback>) {
        let name = name.into();
        if self.state.lock().finished_callbacks.insert(name.clone(), callback) {
            debug!(task_id = %self.id, callback = %name, "finished callback replaced");
        }
    }

    /// Do not call this from inside a finish callback.
    pub fn delete_finished_callback(&self, name: &str) {
        self.state.lock().finished_callbacks.remove(name);
    }

    /// Register a closure consulted when the task enters `ResponseImmediately`.
    pub fn add_recovery_func<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&Task, &str) -> bool + Send + Sync + 'static,
    {
        self.add_recovery_handler(name, Arc::new(callback));
    }

    /// Register a recovery callback object.
    pub fn add_recovery_handler(&self, name: impl Into<String>, callback: Arc<dyn RecoveryCallback>) {
        let name = name.into();
        if self.state.lock().recovery_callbacks.insert(name.clone(), callback) {
            debug!(task_id = %self.id, callback = %name, "recovery callback replaced");
        }
    }

    pub fn delete_recovery_func(&self, name: &str) {
        self.state.lock().recovery_callbacks.remove(name);
    }

    pub fn finished_callback_names(&self) -> Vec<String> {
        self.state.lock().finished_callbacks.names()
    }

    pub fn recovery_func_names(&self) -> Vec<String> {
        self.state.lock().recovery_callbacks.names()
    }

    /// Save a task-lifetime value. Last write wins.
    pub fn with_value<V>(&self, key: impl Into<String>, value: V)
    where
        V: Any + Send + Sync,
    {
        self.with_shared_value(key, Arc::new(value));
    }

    pub fn with_shared_value(&self, key: impl Into<String>, value: TaskValue) {
        self.state.lock().values.insert(key.into(), value);
    }

    /// `None` if the key was never set.
    pub fn value(&self, key: &str) -> Option<TaskValue> {
        self.state.lock().values.get(key)
    }

    /// Typed read. `None` if the key is missing or holds another type.
    pub fn value_as<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.state.lock().values.get_as::<T>(key)
    }

    pub fn value_keys(&self) -> Vec<String> {
        self.state.lock().values.keys()
    }

    /// Receive-only handle on the task's cancellation signal.
    ///
    /// A plugin waiting on I/O for a long time should watch this to leave early.
    pub fn cancel(&self) -> CancelHandle {
        self.cancel.handle()
    }

    /// `None` if the task was never cancelled.
    pub fn cancel_cause(&self) -> Option<CancelError> {
        self.cancel.cause()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.cancel.deadline()
    }

    /// Cancel the task from outside. Returns false if it was already cancelled.
    pub fn request_cancel(&self) -> bool {
        let fired = self.cancel.trigger(CancelError::Canceled);
        if fired {
            info!(task_id = %self.id, cause = %CancelError::Canceled, "task cancelled");
        }
        fired
    }

    /// Run the recovery pass. Driver only.
    ///
    /// Does nothing unless the task is in `ResponseImmediately`. Every
    /// registered recovery callback is called in registration order; if any
    /// returns true the error and result code are cleared and the task goes
    /// back to `Running`.
    pub fn run_recovery(&self, error_plugin_name: &str) -> bool {
        let callbacks = {
            let state = self.state.lock();
            if state.status != TaskStatus::ResponseImmediately {
                return false;
            }
            state.recovery_callbacks.snapshot()
        };

        let mut recovered = false;
        for (name, callback) in callbacks {
            if callback.recover(self, error_plugin_name) {
                debug!(task_id = %self.id, callback = %name, plugin = error_plugin_name, "recovery callback accepted");
                recovered = true;
            }
        }
        if !recovered {
            return false;
        }

        let mut state = self.state.lock();
        if state.status != TaskStatus::ResponseImmediately
            || state.transition(TaskStatus::Running).is_err()
        {
            return false;
        }
        state.error = None;
        state.result_code = TaskResultCode::NONE;
        info!(task_id = %self.id, plugin = error_plugin_name, "task recovered");
        true
    }

    /// Move the task to `Finished` and run the finish pass. Driver only.
    ///
    /// Sets `finish_at`, disarms the deadline and calls every finish
    /// callback once, in registration order, with the status the task had
    /// right before. Returns that status.
    pub fn finalize(&self) -> Result<TaskStatus, TaskError> {
        let (original_status, callbacks) = {
            let mut state = self.state.lock();
            let original_status = state.transition(TaskStatus::Finished)?;
            state.finish_at = Some(self.clock.now());
            (original_status, state.finished_callbacks.snapshot())
        };
        self.cancel.disarm();
        debug!(task_id = %self.id, from = %original_status, "task finished");

        for (_, callback) in callbacks {
            callback.on_finished(self, original_status);
        }
        Ok(original_status)
    }
}

impl Default for Task {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Task")
            .field("id", &format_args!("{}", self.id))
            .field("status", &state.status)
            .field("result_code", &state.result_code)
            .field("error", &state.error.as_ref().map(|e| e.to_string()))
            .field("start_at", &self.start_at)
            .field("finish_at", &state.finish_at)
            .finish_non_exhaustive()
    }
}

/// Builds a [`Task`].
///
/// ```ignore
/// let task = Task::builder()
///     .timeout(Duration::from_secs(3))
///     .build();
/// ```
#[derive(Default)]
pub struct TaskBuilder {
    id: Option<TaskId>,
    clock: Option<Arc<dyn Clock>>,
    deadline: Option<DateTime<Utc>>,
    timeout: Option<std::time::Duration>,
}

impl TaskBuilder {
    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Absolute deadline. Wins over [`timeout`](Self::timeout).
    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to the task's start.
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Task {
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let start_at = clock.now();
        let id = self
            .id
            .unwrap_or_else(|| UlidGenerator::new(Arc::clone(&clock)).generate_task_id());
        let deadline = self.deadline.or_else(|| {
            let timeout = chrono::Duration::from_std(self.timeout?).ok()?;
            start_at.checked_add_signed(timeout)
        });
        let cancel = CancelSignal::new(deadline, Arc::clone(&clock));
        if let Some(cause) = cancel.cause() {
            info!(task_id = %id, cause = %cause, "task created already cancelled");
        }

        Task {
            id,
            start_at,
            clock,
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                result_code: TaskResultCode::NONE,
                error: None,
                finish_at: None,
                values: ValueStore::default(),
                finished_callbacks: CallbackRegistry::new(),
                recovery_callbacks: CallbackRegistry::new(),
            }),
            cancel,
        }
    }
}

#[cfg(test)]
mod tests;
