//! Decoupled event bus for job progress.
//!
//! The controller emits via [`EventBus::emit`]; the CLI (or anything else)
//! subscribes via [`EventBus::subscribe`]. Built on
//! [`tokio::sync::broadcast`] so listeners never slow a job down: a lagging
//! receiver just misses events. Status polling stays the source of truth.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::JobStatus;

/// Events that flow through the system.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A job's persisted status changed.
    StatusChanged { job_id: Uuid, status: JobStatus },
    /// One more row of a job finished, successfully or not.
    RowFinished {
        job_id: Uuid,
        done: usize,
        total: usize,
        failed: bool,
    },
}

impl Event {
    pub fn job_id(&self) -> Uuid {
        match self {
            Event::StatusChanged { job_id, .. } | Event::RowFinished { job_id, .. } => *job_id,
        }
    }
}

/// A broadcast channel that any component can emit to or subscribe from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events. Returns a receiver that yields all
    /// future events (does not replay past ones).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
