//! Dispatcher: owns the worker pool and routes actions from the job queue.
//!
//! Idle workers sit in a bounded channel of [`WorkerHandle`]s. The dispatch
//! loop takes the next action, draws an idle worker and hands the action
//! over. A targeted action that draws the wrong worker puts the worker back
//! and re-enters the loop after `100ms * attempt`.
//!
//! Stopping drains: the loop keeps routing until the job queue is empty and
//! every worker is idle again, and only then are the workers stopped.

use super::worker::{Worker, WorkerHandle, WorkerOptions, WorkerTask, now_millis};
use crate::action::{Action, FlushAction, FlushTrigger};
use crate::dialects::StorageClient;
use crate::error::Result;
use crate::queue::{JobQueue, JobReceiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay unit between redeliveries of a targeted action.
const TARGETED_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Upper bound for the automatic flush tick.
const MAX_FLUSH_TICK: Duration = Duration::from_secs(60);

/// How often a draining dispatch loop rechecks for idle workers.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Pool shape and flush policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub max_workers: usize,
    pub worker: WorkerOptions,
    /// `None` disables automatic flushing.
    pub auto_flush_interval: Option<Duration>,
}

impl DispatcherConfig {
    /// Buffer size of worker `n`.
    ///
    /// Flat unless spread mode is on, in which case sizes start at 75% of
    /// the configured size and grow by `buffer_size / (2 * (workers - 1))`
    /// per worker.
    pub fn buffer_size_for(&self, n: usize) -> usize {
        let buffer_size = self.worker.buffer_size;
        if !self.worker.spread_buffer || self.max_workers < 2 {
            return buffer_size;
        }
        let slice = buffer_size / (2 * (self.max_workers - 1));
        (buffer_size as f64 * 0.75).floor() as usize + n * slice
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOptions {
    /// Only flush workers whose automatic flush is due.
    pub automatic: bool,
}

/// State shared between the dispatcher and its flush ticker.
struct Pool {
    handles: Vec<WorkerHandle>,
    queue: JobQueue,
    auto_flush_interval: Option<Duration>,
}

impl Pool {
    async fn flush(&self, options: FlushOptions) -> usize {
        let trigger = if options.automatic {
            FlushTrigger::Automatic
        } else {
            FlushTrigger::Api
        };
        let now = now_millis();

        let mut enqueued = 0;
        for worker in &self.handles {
            let status = worker.status();
            let due = match self.auto_flush_interval {
                Some(interval) if options.automatic => status.is_due(interval, now),
                _ => true,
            };
            if !due {
                continue;
            }
            if !status.try_mark_flush_pending() {
                debug!(worker_id = worker.id(), "flush already pending");
                continue;
            }
            let action = FlushAction::new(worker.id(), trigger);
            if self.queue.push(action.into()).await.is_err() {
                status.clear_flush_pending();
                warn!("job queue closed, flush abandoned");
                break;
            }
            enqueued += 1;
        }
        enqueued
    }
}

/// A background loop and the signal that ends it.
struct LoopTask {
    signal: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LoopTask {
    async fn finish(self, name: &'static str) {
        let _ = self.signal.send(());
        if let Err(e) = self.task.await {
            error!(task = name, error = %e, "dispatcher task failed");
        }
    }
}

/// Tasks and signals owned until [`Dispatcher::stop`].
struct Control {
    router: Option<LoopTask>,
    ticker: Option<LoopTask>,
    workers: Vec<WorkerTask>,
    stopped: bool,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    pool: Arc<Pool>,
    control: Mutex<Control>,
}

impl Dispatcher {
    /// Create and start one worker per slot, then start the dispatch loop
    /// draining `jobs`.
    pub fn start(
        config: DispatcherConfig,
        storage: Arc<dyn StorageClient>,
        queue: JobQueue,
        jobs: JobReceiver,
    ) -> Result<Self> {
        let worker_count = config.max_workers.max(1);
        let (pool_tx, pool_rx) = mpsc::channel(worker_count);

        let mut handles = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let worker = Worker::new(
                id,
                config.buffer_size_for(id),
                config.worker.retry_attempt,
                Arc::clone(&storage),
                queue.clone(),
            )?;
            let (handle, task) = worker.spawn(pool_tx.clone());
            handles.push(handle);
            workers.push(task);
        }

        let (drain_tx, drain_rx) = oneshot::channel();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let router = Router {
            idle: pool_rx,
            idle_tx: pool_tx,
            retry_tx,
            queue: queue.clone(),
            worker_count,
        };
        let dispatch = tokio::spawn(router.run(jobs, retry_rx, drain_rx));

        info!(
            workers = worker_count,
            storage = storage.name(),
            buffered = storage.is_buffered_storage(),
            "dispatcher started"
        );

        Ok(Self {
            config,
            pool: Arc::new(Pool {
                handles,
                queue,
                auto_flush_interval: config.auto_flush_interval,
            }),
            control: Mutex::new(Control {
                router: Some(LoopTask {
                    signal: drain_tx,
                    task: dispatch,
                }),
                ticker: None,
                workers,
                stopped: false,
            }),
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Handles of every worker, indexed by worker id.
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.pool.handles
    }

    pub fn buffer_size_for(&self, n: usize) -> usize {
        self.config.buffer_size_for(n)
    }

    /// Enqueue one targeted flush per worker. Automatic flushes skip workers
    /// that are not due; workers with a flush already pending are skipped
    /// either way. Returns the number of flushes enqueued.
    pub async fn flush(&self, options: FlushOptions) -> usize {
        let enqueued = self.pool.flush(options).await;
        info!(automatic = options.automatic, enqueued, "flush requested");
        enqueued
    }

    /// Start the periodic flush ticker if an interval is configured.
    /// The tick is the interval capped at 60 seconds.
    pub async fn start_automatic_flush(&self) -> bool {
        let Some(interval) = self.config.auto_flush_interval else {
            return false;
        };
        let mut control = self.control.lock().await;
        if control.stopped || control.ticker.is_some() {
            return false;
        }

        let tick = interval.min(MAX_FLUSH_TICK);
        let pool = Arc::clone(&self.pool);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let enqueued = pool.flush(FlushOptions { automatic: true }).await;
                        debug!(enqueued, "automatic flush tick");
                    }
                }
            }
        });
        control.ticker = Some(LoopTask {
            signal: stop_tx,
            task,
        });

        info!(
            interval_secs = interval.as_secs(),
            tick_secs = tick.as_secs(),
            "automatic flush enabled"
        );
        true
    }

    /// Stop the ticker, route everything still queued, then stop every
    /// worker and wait for all of them. Callers stop producing first.
    /// Terminal; later calls return immediately.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if control.stopped {
            return;
        }
        control.stopped = true;

        if let Some(ticker) = control.ticker.take() {
            ticker.finish("flush ticker").await;
        }
        if let Some(router) = control.router.take() {
            info!(queued = self.pool.queue.len(), "draining job queue");
            router.finish("dispatch loop").await;
        }

        let pending = self.pool.queue.len();
        if pending > 0 {
            warn!(pending, "stopping with actions still queued");
        }

        info!(workers = control.workers.len(), "stopping workers");
        let joins: Vec<(usize, JoinHandle<()>)> = control
            .workers
            .drain(..)
            .map(|task| (task.id(), task.stop()))
            .collect();
        for (worker_id, join) in joins {
            if let Err(e) = join.await {
                error!(worker_id, error = %e, "worker task failed");
            }
        }
        info!("all workers stopped");
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// The dispatch loop's state. Only the loop draws from the idle pool.
struct Router {
    idle: mpsc::Receiver<WorkerHandle>,
    idle_tx: mpsc::Sender<WorkerHandle>,
    retry_tx: mpsc::UnboundedSender<(Action, u32)>,
    queue: JobQueue,
    worker_count: usize,
}

impl Router {
    /// Route until `drain` fires, then hand over whatever is left.
    async fn run(
        mut self,
        mut jobs: JobReceiver,
        mut retries: mpsc::UnboundedReceiver<(Action, u32)>,
        mut drain: oneshot::Receiver<()>,
    ) {
        loop {
            let (action, attempt) = tokio::select! {
                biased;
                _ = &mut drain => break,
                Some(retry) = retries.recv() => retry,
                action = jobs.recv() => match action {
                    Some(action) => (action, 0),
                    None => {
                        debug!("job queue closed");
                        break;
                    }
                },
            };

            // An action taken off the queue is always handed over.
            let Some(worker) = self.idle.recv().await else {
                warn!(kind = %action.kind(), "worker pool closed, dropping action");
                return;
            };
            self.send(action, attempt, worker).await;
        }

        self.drain(&mut jobs).await;
        debug!("dispatch loop stopped");
    }

    /// Route queued events until the queue is empty and every worker is
    /// idle. A worker requeues a failed event before it registers as idle,
    /// so an empty queue with a full pool means nothing is left in flight.
    /// Queued flushes are dropped; every worker flushes when it stops.
    async fn drain(&mut self, jobs: &mut JobReceiver) {
        let mut idle = Vec::with_capacity(self.worker_count);
        loop {
            while let Ok(worker) = self.idle.try_recv() {
                idle.push(worker);
            }
            match jobs.try_recv() {
                Some(Action::Flush(flush)) => {
                    debug!(
                        target = flush.target_worker_id,
                        "dropping queued flush while draining"
                    );
                }
                Some(action) => {
                    let worker = match idle.pop() {
                        Some(worker) => worker,
                        None => match self.idle.recv().await {
                            Some(worker) => worker,
                            None => break,
                        },
                    };
                    self.send(action, 0, worker).await;
                }
                None if idle.len() >= self.worker_count => break,
                None => tokio::time::sleep(DRAIN_POLL).await,
            }
        }
        for worker in idle {
            self.put_back(worker);
        }
    }

    /// Hand `action` to `worker`, or put the worker back and schedule a
    /// delayed retry when a targeted action drew someone else.
    async fn send(&self, action: Action, attempt: u32, worker: WorkerHandle) {
        match action.target_worker_id() {
            Some(target) if target >= self.worker_count => {
                self.put_back(worker);
                warn!(target, "dropping action for unknown worker");
            }
            Some(target) if target != worker.id() => {
                debug!(
                    target,
                    worker_id = worker.id(),
                    attempt,
                    "targeted action drew another worker, re-registering it"
                );
                self.put_back(worker);
                let retry_tx = self.retry_tx.clone();
                let delay = TARGETED_RETRY_DELAY * attempt;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = retry_tx.send((action, attempt + 1));
                });
            }
            _ => {
                let worker_id = worker.id();
                if let Err(action) = worker.deliver(action).await {
                    warn!(worker_id, kind = %action.kind(), "worker stopped before taking its action");
                    if let Action::Event(_) = action {
                        self.queue.requeue(action);
                    }
                }
            }
        }
    }

    fn put_back(&self, worker: WorkerHandle) {
        if self.idle_tx.try_send(worker).is_err() {
            warn!("worker pool closed, dropping idle worker");
        }
    }
}
