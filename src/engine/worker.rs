//! A single worker: one task owning a buffer of pending events.
//!
//! The worker registers itself as idle in the dispatcher's pool, waits for
//! one action or the stop signal, handles the action and registers again.
//! Buffer and penalty are only touched by the worker's own task; everyone
//! else sees the worker through a [`WorkerHandle`] and its [`WorkerStatus`].

use crate::action::{Action, EventAction, FlushAction, FlushTrigger, Retry};
use crate::dialects::{BatchConverter, Converter, StorageClient};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::queue::JobQueue;
use crate::telemetry::metrics;
use crate::telemetry::worker::{record_save, start_worker_span};
use chrono::Utc;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, info, warn};

/// Growth factor applied to the penalty after a failed batch save.
const PENALTY_FACTOR: f64 = 1.5;

/// Settings shared by every worker of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    pub buffer_size: usize,
    pub retry_attempt: u32,
    /// Give workers linearly increasing buffer sizes.
    pub spread_buffer: bool,
}

/// Current unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Shared status
// ---------------------------------------------------------------------------

/// The part of a worker's state other tasks may read.
#[derive(Debug)]
pub struct WorkerStatus {
    last_save: AtomicU64,
    flush_pending: AtomicBool,
    flushes: AtomicU64,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            last_save: AtomicU64::new(now_millis()),
            flush_pending: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
        }
    }

    /// Unix millis of the last successful save (or no-op flush).
    pub fn last_save(&self) -> u64 {
        self.last_save.load(Ordering::Acquire)
    }

    fn touch(&self) {
        self.last_save.store(now_millis(), Ordering::Release);
    }

    /// Whether an automatic flush is due at `now` (unix millis).
    pub fn is_due(&self, interval: Duration, now: u64) -> bool {
        let interval = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        now >= self.last_save().saturating_add(interval)
    }

    /// Claim the right to enqueue a flush for this worker. `false` when one
    /// is already on its way.
    pub fn try_mark_flush_pending(&self) -> bool {
        self.flush_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear_flush_pending(&self) {
        self.flush_pending.store(false, Ordering::Release);
    }

    pub fn is_flush_pending(&self) -> bool {
        self.flush_pending.load(Ordering::Acquire)
    }

    /// Number of flush actions this worker has handled.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }

    fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::AcqRel);
        self.clear_flush_pending();
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// What the idle pool holds: a way to hand one action to one worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: usize,
    jobs: mpsc::Sender<Action>,
    status: Arc<WorkerStatus>,
}

impl WorkerHandle {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> &WorkerStatus {
        &self.status
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: usize, jobs: mpsc::Sender<Action>) -> Self {
        Self {
            id,
            jobs,
            status: Arc::new(WorkerStatus::new()),
        }
    }

    /// Hand over an action. Gives it back if the worker has stopped.
    pub async fn deliver(&self, action: Action) -> std::result::Result<(), Action> {
        self.jobs.send(action).await.map_err(|err| err.0)
    }
}

/// Owner side of a spawned worker: stop signal plus join handle.
#[derive(Debug)]
pub struct WorkerTask {
    id: usize,
    stop: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerTask {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Signal the worker to stop. Await the returned handle for termination.
    pub fn stop(self) -> JoinHandle<()> {
        debug!(worker_id = self.id, "sending stop signal");
        let _ = self.stop.send(());
        self.join
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Save strategy, fixed when the worker is built.
#[derive(Clone, Copy)]
enum SaveStrategy {
    Single(Converter),
    Batch(BatchConverter),
}

pub struct Worker {
    id: usize,
    buffer_size: usize,
    retry_attempt: u32,
    buffer: Vec<Event>,
    penalty: f64,
    strategy: SaveStrategy,
    storage: Arc<dyn StorageClient>,
    queue: JobQueue,
    status: Arc<WorkerStatus>,
    span: Span,
}

impl Worker {
    /// Build a worker. Fails when the storage does not offer the converter
    /// its buffering mode needs.
    pub fn new(
        id: usize,
        buffer_size: usize,
        retry_attempt: u32,
        storage: Arc<dyn StorageClient>,
        queue: JobQueue,
    ) -> Result<Self> {
        let buffered = storage.is_buffered_storage();
        let strategy = if buffered {
            storage.batch_converter().map(SaveStrategy::Batch)
        } else {
            storage.converter().map(SaveStrategy::Single)
        }
        .ok_or_else(|| {
            Error::Config(format!(
                "`{}` storage does not provide a converter for its buffering mode",
                storage.name()
            ))
        })?;

        Ok(Self {
            id,
            buffer_size,
            retry_attempt,
            buffer: Vec::new(),
            penalty: 1.0,
            strategy,
            storage,
            queue,
            status: Arc::new(WorkerStatus::new()),
            span: start_worker_span(id, buffered),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.strategy, SaveStrategy::Batch(_))
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }

    pub fn buffered_events(&self) -> &[Event] {
        &self.buffer
    }

    /// Buffer length that triggers a batch save: `floor(buffer_size * penalty)`,
    /// never below one.
    pub fn effective_capacity(&self) -> usize {
        ((self.buffer_size as f64 * self.penalty).floor() as usize).max(1)
    }

    /// Handle one action.
    pub async fn handle(&mut self, action: Action) {
        match action {
            Action::Event(action) => self.handle_event(action).await,
            Action::Flush(flush) => self.handle_flush(flush).await,
        }
    }

    async fn handle_event(&mut self, action: EventAction) {
        match self.strategy {
            SaveStrategy::Single(convert) => {
                let started = Instant::now();
                let result = match convert(&action.event) {
                    Ok(payload) => self.storage.save(payload).await,
                    Err(e) => Err(e),
                };
                self.observe_save("single", started, 1, result.is_ok());
                match result {
                    Ok(()) => {
                        self.status.touch();
                        metrics::events_saved().add(1, &[]);
                    }
                    Err(e) => self.fail_event(action, e),
                }
            }
            SaveStrategy::Batch(convert) => {
                self.buffer.push(action.event);
                if self.buffer.len() >= self.effective_capacity() {
                    self.save_buffer(convert, "batch").await;
                }
            }
        }
    }

    fn fail_event(&self, action: EventAction, err: Error) {
        warn!(
            worker_id = self.id,
            attempt = action.attempt,
            error = %err,
            "saving event failed"
        );
        metrics::saves_failed().add(1, &[KeyValue::new("mode", "single")]);

        match action.mark_as_failed(self.retry_attempt, &self.queue) {
            Retry::Requeued { attempt } => {
                metrics::actions_requeued().add(1, &[]);
                debug!(worker_id = self.id, attempt, "event requeued");
            }
            Retry::Dropped(action) => {
                metrics::actions_dropped().add(1, &[]);
                error!(
                    worker_id = self.id,
                    attempt = action.attempt,
                    event = %action.event.event,
                    "dropping event after last retry"
                );
            }
        }
    }

    async fn handle_flush(&mut self, flush: FlushAction) {
        // Only reachable when a flush is handed over without going through
        // the dispatcher's routing, so it is not worth a warning.
        if flush.target_worker_id != self.id {
            debug!(
                worker_id = self.id,
                target = flush.target_worker_id,
                "flush meant for another worker, requeueing"
            );
            self.queue.requeue(Action::Flush(flush));
            return;
        }

        metrics::flushes().add(1, &[KeyValue::new("trigger", flush.trigger.as_str())]);
        match self.strategy {
            SaveStrategy::Batch(convert) if !self.buffer.is_empty() => {
                debug!(
                    worker_id = self.id,
                    records = self.buffer.len(),
                    trigger = flush.trigger.as_str(),
                    "flushing buffer"
                );
                self.save_buffer(convert, "batch").await;
            }
            _ => self.status.touch(),
        }
        self.status.record_flush();
    }

    /// Batch-save the whole buffer. On success the buffer empties and the
    /// penalty resets; on failure the buffer stays and the penalty grows.
    async fn save_buffer(&mut self, convert: BatchConverter, mode: &'static str) -> bool {
        let records = self.buffer.len();
        let started = Instant::now();
        let result = match convert(&self.buffer) {
            Ok(payload) => self.storage.save(payload).await,
            Err(e) => Err(e),
        };
        self.observe_save(mode, started, records, result.is_ok());

        match result {
            Ok(()) => {
                self.buffer.clear();
                self.penalty = 1.0;
                self.status.touch();
                metrics::events_saved().add(records as u64, &[]);
                debug!(worker_id = self.id, records, "buffer saved");
                true
            }
            Err(e) => {
                self.penalty *= PENALTY_FACTOR;
                metrics::saves_failed().add(1, &[KeyValue::new("mode", mode)]);
                warn!(
                    worker_id = self.id,
                    records,
                    penalty = self.penalty,
                    error = %e,
                    "saving buffer failed, keeping events"
                );
                false
            }
        }
    }

    fn observe_save(&self, mode: &'static str, started: Instant, records: usize, ok: bool) {
        metrics::save_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("mode", mode)],
        );
        record_save(&self.span, records, ok);
    }

    /// Best-effort final flush. A failure is logged and the buffer is lost.
    pub async fn shutdown(&mut self) {
        let SaveStrategy::Batch(convert) = self.strategy else {
            info!(worker_id = self.id, "worker stopped");
            return;
        };
        if !self.buffer.is_empty() {
            let records = self.buffer.len();
            info!(worker_id = self.id, records, "flushing buffer before stop");
            metrics::flushes().add(
                1,
                &[KeyValue::new("trigger", FlushTrigger::Shutdown.as_str())],
            );
            if !self.save_buffer(convert, "shutdown").await {
                error!(worker_id = self.id, records, "final flush failed, buffered events lost");
                self.buffer.clear();
            }
        }
        info!(worker_id = self.id, "worker stopped");
    }

    /// Start the worker's task. It registers in `pool` whenever it is idle.
    pub fn spawn(self, pool: mpsc::Sender<WorkerHandle>) -> (WorkerHandle, WorkerTask) {
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = WorkerHandle {
            id: self.id,
            jobs: jobs_tx,
            status: Arc::clone(&self.status),
        };

        let id = self.id;
        let span = self.span.clone();
        let join = tokio::spawn(
            self.run(handle.clone(), pool, jobs_rx, stop_rx)
                .instrument(span),
        );

        (
            handle,
            WorkerTask {
                id,
                stop: stop_tx,
                join,
            },
        )
    }

    async fn run(
        mut self,
        handle: WorkerHandle,
        pool: mpsc::Sender<WorkerHandle>,
        mut jobs: mpsc::Receiver<Action>,
        mut stop: oneshot::Receiver<()>,
    ) {
        if self.is_buffered() {
            info!(worker_id = self.id, buffer_size = self.buffer_size, "worker started");
        } else {
            info!(worker_id = self.id, "worker started");
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                registered = pool.send(handle.clone()) => {
                    if registered.is_err() {
                        debug!(worker_id = self.id, "worker pool closed");
                        break;
                    }
                }
            }

            let action = tokio::select! {
                biased;
                _ = &mut stop => break,
                action = jobs.recv() => action,
            };
            match action {
                Some(action) => self.handle(action).await,
                None => break,
            }
        }

        // An action handed over just before the stop signal still counts.
        while let Ok(action) = jobs.try_recv() {
            debug!(worker_id = self.id, kind = %action.kind(), "handling action delivered before stop");
            self.handle(action).await;
        }
        self.shutdown().await;
    }
}
