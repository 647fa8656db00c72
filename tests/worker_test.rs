//! Integration tests for the worker state machine.

mod common;

use common::{RecordingStorage, event, event_names};
use hamustro::action::{Action, EventAction, FlushAction, FlushTrigger};
use hamustro::engine::{Worker, WorkerHandle};
use hamustro::queue::{JobReceiver, job_queue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn worker(
    storage: &Arc<RecordingStorage>,
    buffer_size: usize,
    retry_attempt: u32,
) -> (Worker, JobReceiver) {
    let (queue, jobs) = job_queue(16);
    let worker = Worker::new(0, buffer_size, retry_attempt, storage.clone(), queue).unwrap();
    (worker, jobs)
}

fn event_action(name: &str) -> Action {
    EventAction::new(event(name)).into()
}

fn flush_action(target: usize) -> Action {
    FlushAction::new(target, FlushTrigger::Api).into()
}

// ---------------------------------------------------------------------------
// Unbuffered storage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unbuffered_event_is_saved_immediately() {
    let storage = RecordingStorage::unbuffered();
    let (mut worker, mut jobs) = worker(&storage, 10, 3);
    let before = worker.status().last_save();

    worker.handle(event_action("Client.Open")).await;

    assert_eq!(storage.save_count(), 1);
    assert_eq!(event_names(&storage.saved_events()), vec!["Client.Open"]);
    assert!(worker.status().last_save() >= before);
    assert!(jobs.try_recv().is_none());
}

#[tokio::test]
async fn failed_event_is_requeued_until_retry_budget_runs_out() {
    let storage = RecordingStorage::unbuffered();
    storage.set_failing(true);
    let (mut worker, mut jobs) = worker(&storage, 10, 3);

    let mut action = event_action("Client.Open");
    let mut requeues = 0;
    loop {
        worker.handle(action).await;
        match jobs.try_recv() {
            Some(Action::Event(requeued)) => {
                requeues += 1;
                assert_eq!(requeued.attempt, requeues + 1);
                action = requeued.into();
            }
            Some(other) => panic!("unexpected action on the queue: {other:?}"),
            None => break,
        }
    }

    // Attempts 1..=3 are tried; the fourth would exceed the budget.
    assert_eq!(requeues, 2);
    assert_eq!(storage.attempts(), 3);
    assert_eq!(storage.save_count(), 0);
}

#[tokio::test]
async fn requeued_event_succeeds_on_a_later_attempt() {
    let storage = RecordingStorage::unbuffered();
    storage.set_failing(true);
    let (mut worker, mut jobs) = worker(&storage, 10, 3);

    worker.handle(event_action("Client.Open")).await;
    let Some(retry) = jobs.try_recv() else {
        panic!("event was not requeued");
    };

    storage.set_failing(false);
    worker.handle(retry).await;

    assert_eq!(storage.save_count(), 1);
    assert!(jobs.try_recv().is_none());
}

// ---------------------------------------------------------------------------
// Buffered storage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buffer_saves_exactly_when_full() {
    let storage = RecordingStorage::buffered();
    let (mut worker, _jobs) = worker(&storage, 5, 3);

    for i in 0..4 {
        worker.handle(event_action(&format!("e{i}"))).await;
    }
    assert_eq!(storage.attempts(), 0);
    assert_eq!(worker.buffered_events().len(), 4);

    worker.handle(event_action("e4")).await;

    let batches = storage.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        event_names(&batches[0]),
        vec!["e0", "e1", "e2", "e3", "e4"]
    );
    assert!(worker.buffered_events().is_empty());
    assert_eq!(worker.penalty(), 1.0);
}

#[tokio::test]
async fn failed_batch_keeps_buffer_and_grows_penalty() {
    let storage = RecordingStorage::buffered();
    storage.set_failing(true);
    let (mut worker, mut jobs) = worker(&storage, 4, 3);

    for i in 0..4 {
        worker.handle(event_action(&format!("e{i}"))).await;
    }
    assert_eq!(storage.attempts(), 1);
    assert_eq!(worker.buffered_events().len(), 4);
    assert_eq!(worker.penalty(), 1.5);
    assert_eq!(worker.effective_capacity(), 6);
    // Buffered failures never go back to the queue.
    assert!(jobs.try_recv().is_none());

    // Below the grown capacity: no new attempt.
    worker.handle(event_action("e4")).await;
    assert_eq!(storage.attempts(), 1);

    storage.set_failing(false);
    worker.handle(event_action("e5")).await;

    assert_eq!(storage.attempts(), 2);
    assert_eq!(storage.saved_events().len(), 6);
    assert!(worker.buffered_events().is_empty());
    assert_eq!(worker.penalty(), 1.0);
    assert_eq!(worker.effective_capacity(), 4);
}

#[tokio::test]
async fn penalty_compounds_across_failures() {
    let storage = RecordingStorage::buffered();
    storage.set_failing(true);
    let (mut worker, _jobs) = worker(&storage, 2, 3);

    worker.handle(event_action("a")).await;
    worker.handle(event_action("b")).await;
    assert_eq!(worker.penalty(), 1.5);

    worker.handle(event_action("c")).await;
    assert_eq!(worker.penalty(), 2.25);
    assert_eq!(worker.buffered_events().len(), 3);
    assert_eq!(worker.effective_capacity(), 4);
}

// ---------------------------------------------------------------------------
// Flush
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flush_saves_partial_buffer() {
    let storage = RecordingStorage::buffered();
    let (mut worker, _jobs) = worker(&storage, 100, 3);
    let status = worker.status();
    assert!(status.try_mark_flush_pending());

    worker.handle(event_action("a")).await;
    worker.handle(event_action("b")).await;
    worker.handle(flush_action(0)).await;

    assert_eq!(event_names(&storage.saved_events()), vec!["a", "b"]);
    assert!(worker.buffered_events().is_empty());
    assert_eq!(status.flushes(), 1);
    assert!(!status.is_flush_pending());
}

#[tokio::test]
async fn flush_on_empty_buffer_only_touches_last_save() {
    let storage = RecordingStorage::buffered();
    let (mut worker, _jobs) = worker(&storage, 100, 3);
    let before = worker.status().last_save();

    tokio::time::sleep(Duration::from_millis(5)).await;
    worker.handle(flush_action(0)).await;

    assert_eq!(storage.attempts(), 0);
    assert!(worker.status().last_save() > before);
    assert_eq!(worker.status().flushes(), 1);
}

#[tokio::test]
async fn failed_flush_keeps_buffer() {
    let storage = RecordingStorage::buffered();
    let (mut worker, _jobs) = worker(&storage, 100, 3);
    worker.handle(event_action("a")).await;

    storage.set_failing(true);
    worker.handle(flush_action(0)).await;

    assert_eq!(storage.attempts(), 1);
    assert_eq!(worker.buffered_events().len(), 1);
    assert_eq!(worker.penalty(), 1.5);
}

#[tokio::test]
async fn flush_for_another_worker_is_handed_back() {
    let storage = RecordingStorage::buffered();
    let (mut worker, mut jobs) = worker(&storage, 100, 3);
    worker.handle(event_action("a")).await;

    worker.handle(flush_action(3)).await;

    assert_eq!(storage.attempts(), 0);
    assert_eq!(worker.buffered_events().len(), 1);
    assert_eq!(worker.status().flushes(), 0);
    match jobs.try_recv() {
        Some(Action::Flush(flush)) => assert_eq!(flush.target_worker_id, 3),
        other => panic!("expected the flush back on the queue, got {other:?}"),
    }
}

#[tokio::test]
async fn flush_pending_flag_is_exclusive() {
    let storage = RecordingStorage::buffered();
    let (worker, _jobs) = worker(&storage, 100, 3);
    let status = worker.status();

    assert!(status.try_mark_flush_pending());
    assert!(!status.try_mark_flush_pending());
    status.clear_flush_pending();
    assert!(status.try_mark_flush_pending());
}

#[tokio::test]
async fn automatic_flush_due_after_interval() {
    let storage = RecordingStorage::buffered();
    let (worker, _jobs) = worker(&storage, 100, 3);
    let status = worker.status();
    let last = status.last_save();

    assert!(!status.is_due(Duration::from_secs(60), last + 59_999));
    assert!(status.is_due(Duration::from_secs(60), last + 60_000));
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_flushes_remaining_buffer_once() {
    let storage = RecordingStorage::buffered();
    let (mut worker, _jobs) = worker(&storage, 100, 3);
    for name in ["a", "b", "c"] {
        worker.handle(event_action(name)).await;
    }

    worker.shutdown().await;

    let batches = storage.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(event_names(&batches[0]), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn shutdown_with_failing_storage_still_completes() {
    let storage = RecordingStorage::buffered();
    let (mut worker, mut jobs) = worker(&storage, 100, 3);
    worker.handle(event_action("a")).await;
    storage.set_failing(true);

    worker.shutdown().await;

    assert_eq!(storage.attempts(), 1);
    assert_eq!(storage.save_count(), 0);
    assert!(jobs.try_recv().is_none());
}

#[tokio::test]
async fn shutdown_with_empty_buffer_saves_nothing() {
    let storage = RecordingStorage::buffered();
    let (mut worker, _jobs) = worker(&storage, 100, 3);

    worker.shutdown().await;

    assert_eq!(storage.attempts(), 0);
}

// ---------------------------------------------------------------------------
// Running worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spawned_worker_registers_handles_and_stops() {
    let storage = RecordingStorage::buffered();
    let (worker, _jobs) = worker(&storage, 100, 3);
    let (pool_tx, mut pool_rx) = mpsc::channel::<WorkerHandle>(1);

    let (handle, task) = worker.spawn(pool_tx);
    assert_eq!(handle.id(), 0);

    let idle = pool_rx.recv().await.expect("worker registers as idle");
    idle.deliver(event_action("a")).await.unwrap();

    // Registers again once the action is handled.
    let idle = pool_rx.recv().await.expect("worker registers again");
    idle.deliver(event_action("b")).await.unwrap();

    task.stop().await.unwrap();

    let batches = storage.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(event_names(&batches[0]), vec!["a", "b"]);
}
