use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::TimeZone;
use parking_lot::Mutex;
use rstest::rstest;

use super::*;
use crate::ports::FixedClock;

fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ))
}

fn running_task() -> Task {
    let task = Task::new();
    task.start().unwrap();
    task
}

#[test]
fn new_task_is_pending_with_start_time() {
    let clock = fixed_clock();
    let task = Task::builder().clock(clock.clone()).build();

    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(task.start_at(), clock.now());
    assert_eq!(task.finish_at(), None);
    assert!(task.error().is_none());
    assert!(task.result_code().is_none());
    assert_eq!(task.deadline(), None);
    assert_eq!(task.cancel_cause(), None);
}

#[test]
fn start_only_from_pending() {
    let task = Task::new();
    task.start().unwrap();
    assert_eq!(task.status(), TaskStatus::Running);

    let err = task.start().unwrap_err();
    assert_eq!(
        err,
        TaskError::InvalidTransition {
            from: TaskStatus::Running,
            to: TaskStatus::Running
        }
    );
}

#[rstest]
#[case::from_pending(false)]
#[case::from_running(true)]
fn finish_moves_to_finishing(#[case] started: bool) {
    let task = Task::new();
    if started {
        task.start().unwrap();
    }
    task.finish();
    assert_eq!(task.status(), TaskStatus::Finishing);

    task.finish();
    assert_eq!(task.status(), TaskStatus::Finishing);
}

#[test]
fn finish_does_not_override_error() {
    let task = running_task();
    task.set_error("boom", TaskResultCode(1));
    task.finish();
    assert_eq!(task.status(), TaskStatus::ResponseImmediately);
}

#[rstest]
#[case::pending(TaskStatus::Pending)]
#[case::running(TaskStatus::Running)]
#[case::finishing(TaskStatus::Finishing)]
fn set_error_forces_response_immediately(#[case] before: TaskStatus) {
    let task = Task::new();
    match before {
        TaskStatus::Running => task.start().unwrap(),
        TaskStatus::Finishing => task.finish(),
        _ => {}
    }
    assert_eq!(task.status(), before);

    task.set_error("backend down", TaskResultCode(503));
    assert_eq!(task.status(), TaskStatus::ResponseImmediately);
    assert_eq!(task.result_code(), TaskResultCode(503));
    assert_eq!(task.error().unwrap().to_string(), "backend down");
}

#[test]
fn finished_task_ignores_mutation() {
    let task = running_task();
    task.finish();
    task.finalize().unwrap();
    let finish_at = task.finish_at();

    task.finish();
    task.set_error("late", TaskResultCode(9));
    assert_eq!(task.status(), TaskStatus::Finished);
    assert!(task.error().is_none());
    assert!(task.result_code().is_none());

    assert_eq!(task.finalize(), Err(TaskError::AlreadyFinished));
    assert_eq!(task.finish_at(), finish_at);
    assert!(!task.run_recovery("any"));
}

#[test]
fn finish_at_set_iff_finished() {
    let clock = fixed_clock();
    let task = Task::builder().clock(clock.clone()).build();

    task.start().unwrap();
    assert!(!task.finished());
    assert_eq!(task.finish_at(), None);

    task.finish();
    assert!(!task.finished());
    assert_eq!(task.finish_at(), None);

    clock.advance(chrono::Duration::milliseconds(250));
    task.finalize().unwrap();
    assert!(task.finished());
    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(task.finish_at(), Some(task.start_at() + chrono::Duration::milliseconds(250)));
}

#[test]
fn finish_callbacks_run_once_in_registration_order() {
    let task = running_task();
    let calls = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second", "third"] {
        let calls = Arc::clone(&calls);
        task.add_finished_callback(name, move |_task, status| {
            calls.lock().push((name, status));
        });
    }

    task.finish();
    assert_eq!(task.finalize(), Ok(TaskStatus::Finishing));
    let _ = task.finalize();

    assert_eq!(
        *calls.lock(),
        vec![
            ("first", TaskStatus::Finishing),
            ("second", TaskStatus::Finishing),
            ("third", TaskStatus::Finishing),
        ]
    );
}

#[test]
fn finish_callback_overwrite_keeps_only_latest() {
    let task = running_task();
    let fired = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&fired);
    task.add_finished_callback("a", move |_task, _status| first.lock().push("cb"));
    let second = Arc::clone(&fired);
    task.add_finished_callback("a", move |_task, _status| second.lock().push("cb2"));

    task.finalize().unwrap();
    assert_eq!(*fired.lock(), vec!["cb2"]);
}

#[test]
fn deleted_finish_callback_does_not_fire() {
    let task = running_task();
    let count = Arc::new(AtomicUsize::new(0));

    let c = Arc::clone(&count);
    task.add_finished_callback("gone", move |_task, _status| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    task.delete_finished_callback("gone");
    task.delete_finished_callback("never-registered");

    task.finalize().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(task.finished_callback_names().is_empty());
}

#[test]
fn finish_callback_can_read_task() {
    let task = running_task();
    let seen = Arc::new(Mutex::new(None));

    let s = Arc::clone(&seen);
    task.add_finished_callback("reader", move |task: &Task, _status| {
        *s.lock() = Some((task.finished(), task.finish_at().is_some()));
    });
    task.finalize().unwrap();

    assert_eq!(*seen.lock(), Some((true, true)));
}

struct CountingCallback(AtomicUsize);

impl FinishedCallback for CountingCallback {
    fn on_finished(&self, _task: &Task, _original_status: TaskStatus) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn finish_handler_objects_are_supported() {
    let task = running_task();
    let handler = Arc::new(CountingCallback(AtomicUsize::new(0)));
    task.add_finished_handler("counter", handler.clone());

    task.finalize().unwrap();
    assert_eq!(handler.0.load(Ordering::SeqCst), 1);
}

#[test]
fn recovery_true_restores_running_and_clears_error() {
    let task = running_task();
    let seen_plugin = Arc::new(Mutex::new(String::new()));

    let s = Arc::clone(&seen_plugin);
    task.add_recovery_func("retry-once", move |_task: &Task, plugin: &str| {
        *s.lock() = plugin.to_string();
        true
    });

    task.set_error("upstream timeout", TaskResultCode(504));
    assert!(task.run_recovery("http_output"));

    assert_eq!(task.status(), TaskStatus::Running);
    assert!(task.error().is_none());
    assert!(task.result_code().is_none());
    assert_eq!(*seen_plugin.lock(), "http_output");
}

#[rstest]
#[case::callback_declines(true)]
#[case::no_callbacks(false)]
fn recovery_false_keeps_error(#[case] register_declining: bool) {
    let task = running_task();
    if register_declining {
        task.add_recovery_func("nope", |_task: &Task, _plugin: &str| false);
    }

    task.set_error("bad gateway", TaskResultCode(502));
    assert!(!task.run_recovery("proxy"));
    assert_eq!(task.status(), TaskStatus::ResponseImmediately);
    assert_eq!(task.result_code(), TaskResultCode(502));

    assert_eq!(task.finalize(), Ok(TaskStatus::ResponseImmediately));
    assert_eq!(task.error().unwrap().to_string(), "bad gateway");
}

#[test]
fn recovery_asks_every_callback_and_any_true_wins() {
    let task = running_task();
    let asked = Arc::new(Mutex::new(Vec::new()));

    for (name, answer) in [("a", false), ("b", true), ("c", false)] {
        let asked = Arc::clone(&asked);
        task.add_recovery_func(name, move |_task: &Task, _plugin: &str| {
            asked.lock().push(name);
            answer
        });
    }

    task.set_error("x", TaskResultCode(1));
    assert!(task.run_recovery("p"));
    assert_eq!(*asked.lock(), vec!["a", "b", "c"]);
}

#[test]
fn recovery_is_noop_outside_response_immediately() {
    let task = running_task();
    task.add_recovery_func("always", |_task: &Task, _plugin: &str| true);
    assert!(!task.run_recovery("p"));
    assert_eq!(task.status(), TaskStatus::Running);

    task.delete_recovery_func("always");
    task.delete_recovery_func("missing");
    assert!(task.recovery_func_names().is_empty());
}

#[test]
fn values_last_write_wins_and_missing_is_none() {
    let task = Task::new();
    task.with_value("k", 5_i32);
    assert_eq!(task.value_as::<i32>("k").as_deref(), Some(&5));

    task.with_value("k", 7_i32);
    assert_eq!(task.value_as::<i32>("k").as_deref(), Some(&7));

    assert!(task.value("missing").is_none());
    assert!(task.value_as::<String>("k").is_none());
    assert_eq!(task.value_keys(), vec!["k"]);
}

#[test]
fn values_survive_finish() {
    let task = running_task();
    task.with_value("body", b"hello".to_vec());
    task.finalize().unwrap();
    assert_eq!(
        task.value_as::<Vec<u8>>("body").as_deref(),
        Some(&b"hello".to_vec())
    );
}

#[test]
fn cancel_handles_observe_single_trigger() {
    let task = Task::new();
    let a = task.cancel();
    let b = task.cancel();
    assert!(a.same_signal(&b));
    assert!(!a.is_cancelled());

    assert!(task.request_cancel());
    assert!(!task.request_cancel());

    assert!(a.is_cancelled());
    assert!(b.is_cancelled());
    assert_eq!(task.cancel_cause(), Some(CancelError::Canceled));
}

#[test]
fn cancellation_is_not_a_status_change() {
    let task = running_task();
    task.request_cancel();
    assert_eq!(task.status(), TaskStatus::Running);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn all_concurrent_waiters_wake_on_one_trigger() {
    let task = Arc::new(Task::new());
    let woken = Arc::new(AtomicUsize::new(0));
    let waiters = 16;

    let mut joins = Vec::with_capacity(waiters);
    for _ in 0..waiters {
        let handle = task.cancel();
        let woken = Arc::clone(&woken);
        joins.push(tokio::spawn(async move {
            let cause = handle.cancelled().await;
            woken.fetch_add(1, Ordering::SeqCst);
            cause
        }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    task.request_cancel();

    for join in joins {
        let cause = tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cause, CancelError::Canceled);
    }
    assert_eq!(woken.load(Ordering::SeqCst), waiters);
}

#[tokio::test]
async fn waiter_started_after_trigger_returns_immediately() {
    let task = Task::new();
    task.request_cancel();
    let cause = tokio::time::timeout(Duration::from_millis(100), task.cancel().cancelled())
        .await
        .unwrap();
    assert_eq!(cause, CancelError::Canceled);
}

#[test]
fn past_deadline_cancels_without_other_operations() {
    let clock = fixed_clock();
    let deadline = clock.now() - chrono::Duration::seconds(1);
    let task = Task::builder().clock(clock).deadline(deadline).build();

    assert_eq!(task.deadline(), Some(deadline));
    assert_eq!(task.cancel_cause(), Some(CancelError::DeadlineExceeded));
    assert_eq!(task.status(), TaskStatus::Pending);
}

#[test]
fn zero_timeout_is_already_exceeded() {
    let clock = fixed_clock();
    let task = Task::builder()
        .clock(clock.clone())
        .timeout(Duration::ZERO)
        .build();
    assert_eq!(task.deadline(), Some(clock.now()));
    assert_eq!(task.cancel_cause(), Some(CancelError::DeadlineExceeded));
}

#[test]
fn timeout_sets_deadline_relative_to_start() {
    let clock = fixed_clock();
    let task = Task::builder()
        .clock(clock.clone())
        .timeout(Duration::from_secs(3))
        .build();
    assert_eq!(
        task.deadline(),
        Some(task.start_at() + chrono::Duration::seconds(3))
    );

    assert!(!task.cancel().is_cancelled());
    clock.advance(chrono::Duration::seconds(3));
    assert_eq!(task.cancel_cause(), Some(CancelError::DeadlineExceeded));
}

#[test]
fn explicit_cancel_before_deadline_keeps_first_cause() {
    let clock = fixed_clock();
    let task = Task::builder()
        .clock(clock.clone())
        .timeout(Duration::from_secs(1))
        .build();

    task.request_cancel();
    clock.advance(chrono::Duration::seconds(5));
    assert_eq!(task.cancel_cause(), Some(CancelError::Canceled));
}

#[tokio::test]
async fn deadline_timer_wakes_async_waiter() {
    let task = Task::builder().timeout(Duration::from_millis(30)).build();
    let cause = tokio::time::timeout(Duration::from_secs(5), task.cancel().cancelled())
        .await
        .unwrap();
    assert_eq!(cause, CancelError::DeadlineExceeded);
}

#[tokio::test]
async fn finalize_stops_deadline_timer() {
    let task = Task::builder().timeout(Duration::from_secs(60)).build();
    assert!(task.cancel.has_timer());

    task.start().unwrap();
    task.finalize().unwrap();
    assert!(!task.cancel.has_timer());
    assert_eq!(task.cancel_cause(), None);
}

#[test]
fn deadline_passing_after_finalize_keeps_task_uncancelled() {
    let clock = fixed_clock();
    let task = Task::builder()
        .clock(clock.clone())
        .timeout(Duration::from_secs(1))
        .build();
    let handle = task.cancel();

    task.start().unwrap();
    task.finish();
    task.finalize().unwrap();
    assert_eq!(task.cancel_cause(), None);

    clock.advance(chrono::Duration::seconds(5));
    assert_eq!(task.cancel_cause(), None);
    assert!(!handle.is_cancelled());
    assert_eq!(handle.wait_timeout(Duration::from_millis(20)), None);

    // explicit cancellation still works after finish
    assert!(task.request_cancel());
    assert_eq!(task.cancel_cause(), Some(CancelError::Canceled));
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Finish,
    SetError,
    Recover(bool),
    Finalize,
}

const OPS: [Op; 6] = [
    Op::Start,
    Op::Finish,
    Op::SetError,
    Op::Recover(true),
    Op::Recover(false),
    Op::Finalize,
];

fn apply(task: &Task, accept_recovery: &AtomicBool, op: Op) {
    match op {
        Op::Start => {
            let _ = task.start();
        }
        Op::Finish => task.finish(),
        Op::SetError => task.set_error("boom", TaskResultCode(7)),
        Op::Recover(accept) => {
            accept_recovery.store(accept, Ordering::SeqCst);
            task.run_recovery("plugin");
        }
        Op::Finalize => {
            let _ = task.finalize();
        }
    }
}

#[test]
fn status_only_regresses_through_recovery() {
    let mut sequences: Vec<Vec<Op>> = vec![Vec::new()];
    for _ in 0..4 {
        sequences = sequences
            .into_iter()
            .flat_map(|seq| {
                OPS.iter().map(move |op| {
                    let mut next = seq.clone();
                    next.push(*op);
                    next
                })
            })
            .collect();
    }
    assert_eq!(sequences.len(), 6usize.pow(4));

    for ops in sequences {
        let task = Task::new();
        let accept = Arc::new(AtomicBool::new(false));
        let a = Arc::clone(&accept);
        task.add_recovery_func("toggle", move |_task: &Task, _plugin: &str| {
            a.load(Ordering::SeqCst)
        });

        for (i, op) in ops.iter().enumerate() {
            let before = task.status();
            apply(&task, &accept, *op);
            let after = task.status();

            if before != after {
                assert!(
                    before.can_transition_to(after),
                    "{ops:?} step {i}: {before} -> {after} is not an edge"
                );
            }
            assert!(
                after.rank() >= before.rank()
                    || (before, after) == (TaskStatus::ResponseImmediately, TaskStatus::Running),
                "{ops:?} step {i}: {before} -> {after} went backwards"
            );
            assert_eq!(task.finish_at().is_some(), task.finished(), "{ops:?} step {i}");
            if after == TaskStatus::ResponseImmediately {
                assert!(task.error().is_some(), "{ops:?} step {i}");
            }
            if task.error().is_some() {
                assert!(
                    matches!(after, TaskStatus::ResponseImmediately | TaskStatus::Finished),
                    "{ops:?} step {i}: error kept in {after}"
                );
            }
        }
    }
}

#[test]
fn end_to_end_error_without_recovery() {
    let task = Task::new();
    assert_eq!(task.status(), TaskStatus::Pending);

    task.start().unwrap();
    assert_eq!(task.status(), TaskStatus::Running);

    task.set_error("errX", TaskResultCode(42));
    assert_eq!(task.status(), TaskStatus::ResponseImmediately);
    assert_eq!(task.error().unwrap().to_string(), "errX");
    assert_eq!(task.result_code(), TaskResultCode(42));

    let original = Arc::new(Mutex::new(None));
    let o = Arc::clone(&original);
    task.add_finished_callback("observer", move |_task, status| {
        *o.lock() = Some(status);
    });

    assert!(!task.run_recovery("plugin-x"));
    task.finalize().unwrap();

    assert_eq!(task.status(), TaskStatus::Finished);
    assert_eq!(*original.lock(), Some(TaskStatus::ResponseImmediately));
}

#[test]
fn debug_output_names_status() {
    let task = Task::new();
    let rendered = format!("{task:?}");
    assert!(rendered.contains("Pending"));
    assert!(rendered.contains(&task.id().to_string()));
}
