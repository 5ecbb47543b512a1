//! Units of work queued for delivery to a target agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifiers::{AgentIdentity, TaskId};

/// Lifecycle state of a task
///
/// Terminal on `Delivered` or `Failed`; the dispatcher never retries a
/// failed task itself - re-enqueueing is the submitter's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the queue for an admissible session
    Queued,
    /// Handed to a session worker for delivery
    Dispatched,
    /// Terminal: the payload reached the host
    Delivered,
    /// Terminal: delivery or session start failed
    Failed,
}

impl TaskState {
    /// Whether the task has reached a terminal state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// One unit of work: an opaque payload addressed to a target agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Identity that submitted the task ("system" for external submissions)
    pub source: AgentIdentity,

    /// Identity the payload is addressed to
    pub target: AgentIdentity,

    /// Opaque message body
    pub payload: String,

    /// When the task was submitted
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    /// Create a new queued task with a generated ID
    pub fn new(
        source: AgentIdentity,
        target: AgentIdentity,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            source,
            target,
            payload: payload.into(),
            submitted_at: Utc::now(),
        }
    }
}
