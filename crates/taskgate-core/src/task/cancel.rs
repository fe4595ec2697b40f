//! CancelSignal - 原因と deadline を持つ一回限りのキャンセル通知
//!
//! The signal is triggered at most once; the first cause wins and never
//! changes afterwards. Any number of readers may poll it, await it, or block a
//! thread on it, and every reader observes the trigger no matter when it
//! started waiting.
//!
//! # Deadline
//! - 観測のたびに（`cause`, `is_cancelled`, 各種 wait）task clock と比較する
//! - tokio runtime があれば timer task が deadline で発火させる
//! - タスク終了（`disarm`）または Drop で timer を止め、deadline 判定も無効化する。
//!   終了後に deadline を過ぎても原因は変わらない

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::CancelError;
use crate::ports::Clock;

/// Longest a waiter sleeps before re-reading a clock that is not wall time.
///
/// Wall-time clocks sleep straight to the deadline.
const MAX_PARK: Duration = Duration::from_millis(250);

struct Shared {
    cause: Mutex<Option<CancelError>>,
    cond: Condvar,
    token: CancellationToken,
    deadline: Option<DateTime<Utc>>,
    /// Set once the task finished; the deadline no longer fires.
    disarmed: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl Shared {
    fn trigger(&self, cause: CancelError) -> bool {
        let mut slot = self.cause.lock();
        self.fire(&mut slot, cause)
    }

    fn fire(&self, slot: &mut MutexGuard<'_, Option<CancelError>>, cause: CancelError) -> bool {
        if slot.is_some() {
            return false;
        }
        **slot = Some(cause);
        self.token.cancel();
        self.cond.notify_all();
        true
    }

    /// Time left until an armed deadline; `Some(ZERO)` once it has passed.
    fn remaining(&self) -> Option<Duration> {
        if self.disarmed.load(Ordering::SeqCst) {
            return None;
        }
        let deadline = self.deadline?;
        let left = deadline - self.clock.now();
        Some(left.to_std().unwrap_or(Duration::ZERO))
    }

    /// How long a waiter may sleep when `left` remains until the deadline.
    fn park_for(&self, left: Duration) -> Duration {
        if self.clock.is_wall_time() {
            left
        } else {
            left.min(MAX_PARK)
        }
    }

    fn disarm(&self) {
        self.disarmed.store(true, Ordering::SeqCst);
    }

    fn observe(&self) -> Option<CancelError> {
        let mut slot = self.cause.lock();
        if slot.is_none() && self.remaining() == Some(Duration::ZERO) {
            self.fire(&mut slot, CancelError::DeadlineExceeded);
        }
        *slot
    }

    fn wait_until(&self, limit: Option<std::time::Instant>) -> Option<CancelError> {
        let mut slot = self.cause.lock();
        loop {
            if let Some(cause) = *slot {
                return Some(cause);
            }
            let to_deadline = self.remaining();
            if to_deadline == Some(Duration::ZERO) {
                self.fire(&mut slot, CancelError::DeadlineExceeded);
                continue;
            }
            let to_limit = match limit {
                Some(limit) => {
                    let left = limit.saturating_duration_since(std::time::Instant::now());
                    if left.is_zero() {
                        return None;
                    }
                    Some(left)
                }
                None => None,
            };
            match (to_deadline.map(|d| self.park_for(d)), to_limit) {
                (None, None) => self.cond.wait(&mut slot),
                (Some(a), Some(b)) => {
                    self.cond.wait_for(&mut slot, a.min(b));
                }
                (Some(d), None) | (None, Some(d)) => {
                    self.cond.wait_for(&mut slot, d);
                }
            }
        }
    }
}

/// Owner side of the signal. Lives inside the task.
pub(crate) struct CancelSignal {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl CancelSignal {
    pub(crate) fn new(deadline: Option<DateTime<Utc>>, clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            cause: Mutex::new(None),
            cond: Condvar::new(),
            token: CancellationToken::new(),
            deadline,
            disarmed: AtomicBool::new(false),
            clock,
        });
        // A deadline already in the past fires right here.
        shared.observe();

        let timer = match (shared.remaining(), tokio::runtime::Handle::try_current()) {
            (Some(left), Ok(runtime)) if !left.is_zero() => {
                Some(runtime.spawn(deadline_timer(Arc::clone(&shared))))
            }
            _ => None,
        };

        Self {
            shared,
            timer: Mutex::new(timer),
        }
    }

    pub(crate) fn trigger(&self, cause: CancelError) -> bool {
        self.shared.trigger(cause)
    }

    pub(crate) fn handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn cause(&self) -> Option<CancelError> {
        self.shared.observe()
    }

    pub(crate) fn deadline(&self) -> Option<DateTime<Utc>> {
        self.shared.deadline
    }

    /// Stop the deadline for good: abort the timer and stop the lazy check.
    /// An already recorded cause is kept.
    pub(crate) fn disarm(&self) {
        self.shared.disarm();
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self) -> bool {
        self.timer.lock().is_some()
    }
}

impl Drop for CancelSignal {
    fn drop(&mut self) {
        self.disarm();
    }
}

async fn deadline_timer(shared: Arc<Shared>) {
    loop {
        match shared.remaining() {
            None => return,
            Some(left) if left.is_zero() => {
                if shared.trigger(CancelError::DeadlineExceeded) {
                    tracing::info!(cause = %CancelError::DeadlineExceeded, "task deadline reached");
                }
                return;
            }
            Some(left) => {
                tokio::select! {
                    _ = shared.token.cancelled() => return,
                    _ = tokio::time::sleep(shared.park_for(left)) => {}
                }
            }
        }
    }
}

/// Receive-only view of a task's cancellation signal.
///
/// Cheap to clone; all clones observe the same single trigger.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Non-blocking poll.
    pub fn is_cancelled(&self) -> bool {
        self.shared.observe().is_some()
    }

    pub fn cause(&self) -> Option<CancelError> {
        self.shared.observe()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.shared.deadline
    }

    /// Wait asynchronously until the signal is triggered.
    pub async fn cancelled(&self) -> CancelError {
        loop {
            if let Some(cause) = self.shared.observe() {
                return cause;
            }
            match self.shared.remaining() {
                None => self.shared.token.cancelled().await,
                Some(left) => {
                    tokio::select! {
                        _ = self.shared.token.cancelled() => {}
                        _ = tokio::time::sleep(self.shared.park_for(left)) => {}
                    }
                }
            }
        }
    }

    /// Block the current thread until the signal is triggered.
    ///
    /// Do not call this from inside an async task; use [`cancelled`](Self::cancelled).
    pub fn wait(&self) -> CancelError {
        loop {
            if let Some(cause) = self.shared.wait_until(None) {
                return cause;
            }
        }
    }

    /// Block for at most `timeout`. Returns `None` if the signal was not
    /// triggered in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelError> {
        let limit = std::time::Instant::now().checked_add(timeout);
        match limit {
            Some(limit) => self.shared.wait_until(Some(limit)),
            None => Some(self.wait()),
        }
    }

    /// Do both handles observe the same signal?
    pub fn same_signal(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cause", &*self.shared.cause.lock())
            .field("deadline", &self.shared.deadline)
            .finish()
    }
}
