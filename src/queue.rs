//! The shared bounded job queue.
//!
//! HTTP handlers and failed workers push [`Action`]s in; the dispatcher is the
//! only consumer. A full queue blocks producers, which is the gateway's only
//! back-pressure mechanism.

use crate::action::Action;
use crate::error::{Error, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Producer side of the job queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Action>,
}

/// Consumer side of the job queue, owned by the dispatcher.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<Action>,
}

/// Create a job queue holding at most `capacity` actions.
pub fn job_queue(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    /// Enqueue an action, waiting while the queue is full.
    pub async fn push(&self, action: Action) -> Result<()> {
        self.tx.send(action).await.map_err(|_| Error::QueueClosed)
    }

    /// Put a failed action back without blocking the caller. On a full queue
    /// the send moves to a background task.
    pub fn requeue(&self, action: Action) {
        match self.tx.try_send(action) {
            Ok(()) => {}
            Err(TrySendError::Full(action)) => {
                debug!("job queue full, requeueing in background");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(action).await.is_err() {
                        warn!("job queue closed, dropping requeued action");
                    }
                });
            }
            Err(TrySendError::Closed(_)) => {
                warn!("job queue closed, dropping requeued action");
            }
        }
    }

    /// Number of actions currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl JobReceiver {
    /// Wait for the next action. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Action> {
        self.rx.recv().await
    }

    /// Take the next action if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Action> {
        self.rx.try_recv().ok()
    }
}
