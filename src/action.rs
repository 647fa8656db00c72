//! Units of work submitted to the dispatch system.
//!
//! An [`Action`] is either an event to persist or a request for one specific
//! worker to flush its buffer. Event actions go to whichever worker is idle;
//! flush actions are targeted and only ever run on the worker they name.

use crate::event::Event;
use crate::queue::JobQueue;
use std::fmt;

/// Discriminant of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Event,
    Flush,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Event => f.write_str("event"),
            ActionKind::Flush => f.write_str("flush"),
        }
    }
}

/// A unit of work travelling through the job queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Event(EventAction),
    Flush(FlushAction),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Event(_) => ActionKind::Event,
            Action::Flush(_) => ActionKind::Flush,
        }
    }

    /// Whether this action must be delivered to one specific worker.
    pub fn is_targeted(&self) -> bool {
        self.target_worker_id().is_some()
    }

    /// The worker that must run this action, `None` for "any worker".
    pub fn target_worker_id(&self) -> Option<usize> {
        match self {
            Action::Event(_) => None,
            Action::Flush(flush) => Some(flush.target_worker_id),
        }
    }
}

impl From<EventAction> for Action {
    fn from(action: EventAction) -> Self {
        Action::Event(action)
    }
}

impl From<FlushAction> for Action {
    fn from(action: FlushAction) -> Self {
        Action::Flush(action)
    }
}

// ---------------------------------------------------------------------------
// Event action
// ---------------------------------------------------------------------------

/// Persist one event. `attempt` starts at 1 and grows by one per failure.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAction {
    pub event: Event,
    pub attempt: u32,
}

/// What happened to a failed event action.
#[derive(Debug)]
pub enum Retry {
    /// Put back on the job queue for another worker to pick up.
    Requeued { attempt: u32 },
    /// Retry budget exhausted; the action is gone.
    Dropped(EventAction),
}

impl EventAction {
    pub fn new(event: Event) -> Self {
        Self { event, attempt: 1 }
    }

    /// Record a failed save. The action goes back on `queue` while
    /// `attempt <= retry_attempt`, otherwise it is dropped.
    pub fn mark_as_failed(mut self, retry_attempt: u32, queue: &JobQueue) -> Retry {
        self.attempt += 1;
        if self.attempt <= retry_attempt {
            let attempt = self.attempt;
            queue.requeue(Action::Event(self));
            Retry::Requeued { attempt }
        } else {
            Retry::Dropped(self)
        }
    }
}

// ---------------------------------------------------------------------------
// Flush action
// ---------------------------------------------------------------------------

/// What asked for a flush. Only used for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    Api,
    Automatic,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            FlushTrigger::Api => "api",
            FlushTrigger::Automatic => "automatic",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// Ask worker `target_worker_id` to persist whatever it has buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushAction {
    pub target_worker_id: usize,
    pub trigger: FlushTrigger,
}

impl FlushAction {
    pub fn new(target_worker_id: usize, trigger: FlushTrigger) -> Self {
        Self {
            target_worker_id,
            trigger,
        }
    }
}
