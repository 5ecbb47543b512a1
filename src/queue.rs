//! Pending task queue
//!
//! Tasks are FIFO per target identity, but dispatch order across identities
//! follows global submission age, so a slow target never blocks dispatch to
//! other targets (no head-of-line blocking across agents). The queue is
//! owned exclusively by the dispatcher's scheduling loop and needs no
//! internal locking.

use std::collections::{HashMap, VecDeque};

use crate::error::{RelayError, Result};
use crate::types::{AgentIdentity, Task};

struct QueuedTask {
    /// Global submission order, for oldest-first selection across identities
    order: u64,
    task: Task,
}

/// Per-identity FIFO queues of tasks awaiting dispatch
#[derive(Default)]
pub struct TaskQueue {
    queues: HashMap<AgentIdentity, VecDeque<QueuedTask>>,
    next_order: u64,
    closed: bool,
}

impl TaskQueue {
    /// Create an empty, open queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks across all identities
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Whether no tasks are queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    /// Whether the queue has been closed to new submissions
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the queue; already queued tasks stay queued
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Append a task to its target's queue
    ///
    /// # Errors
    /// Returns `QueueClosed` after `close` has been called.
    pub fn enqueue(&mut self, task: Task) -> Result<()> {
        if self.closed {
            return Err(RelayError::QueueClosed);
        }
        let order = self.next_order;
        self.next_order += 1;
        self.queues
            .entry(task.target.clone())
            .or_default()
            .push_back(QueuedTask { order, task });
        Ok(())
    }

    /// Pop the oldest queued task whose target is currently admissible
    ///
    /// Only the front of each per-identity queue is considered, preserving
    /// FIFO within an identity; among admissible fronts the globally oldest
    /// submission wins. Returns `None` when no admissible task exists,
    /// signalling the dispatcher to wait for the next scheduling
    /// opportunity.
    pub fn dequeue_next(&mut self, admissible: impl Fn(&AgentIdentity) -> bool) -> Option<Task> {
        let identity = self
            .queues
            .iter()
            .filter(|(identity, queue)| !queue.is_empty() && admissible(identity))
            .min_by_key(|(_, queue)| queue.front().map_or(u64::MAX, |q| q.order))
            .map(|(identity, _)| identity.clone())?;

        let queue = self.queues.get_mut(&identity)?;
        let queued = queue.pop_front()?;
        if queue.is_empty() {
            self.queues.remove(&identity);
        }
        Some(queued.task)
    }
}
