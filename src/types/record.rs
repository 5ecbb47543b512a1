//! Immutable journal records
//!
//! One `MessageRecord` is appended per delivery attempt and per lifecycle
//! event. Records are never mutated; the journal is the durable history of
//! everything the system did, in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifiers::{AgentIdentity, TaskId};

/// Outcome of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The payload was written to the host but no acknowledgment arrived
    /// within the delivery timeout
    Sent,
    /// The host acknowledged the payload
    Acknowledged,
    /// The payload did not reach the host
    Failed,
}

impl DeliveryOutcome {
    /// Whether this outcome counts as a successful delivery
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Sent | Self::Acknowledged)
    }
}

/// Tag for standalone lifecycle events recorded in the journal
///
/// A record carrying one of these is a status event, not a delivery; its
/// `task` field is set only for the task-scoped variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A task entered the queue
    TaskQueued,
    /// A task was handed to a session worker
    TaskDispatched,
    /// A session host is being created for the target identity
    SessionStarting,
    /// The session host signalled readiness
    SessionReady,
    /// Graceful shutdown of the session began; its capacity slot is free
    SessionStopping,
    /// The session stopped gracefully
    SessionStopped,
    /// The session was forcibly terminated
    SessionTerminated,
}

/// One immutable, logged record: a delivery attempt or a lifecycle event
///
/// Serialized as one JSON object per journal line. The format is
/// append-only and forward-compatible: readers must tolerate unknown
/// fields, writers may only add optional ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Monotonic sequence number, assigned at append time, never reused
    pub seq: u64,

    /// When the record was appended
    pub ts: DateTime<Utc>,

    /// Originating identity ("system" for lifecycle events)
    pub source: AgentIdentity,

    /// Identity the record concerns
    pub target: AgentIdentity,

    /// Task this record belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskId>,

    /// Message body, or a short description for lifecycle events
    pub payload: String,

    /// Delivery outcome; lifecycle events carry `Sent`
    pub outcome: DeliveryOutcome,

    /// Set when this record is a standalone lifecycle event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<LifecycleEvent>,
}

impl MessageRecord {
    /// Whether this record is a standalone lifecycle event
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        self.event.is_some()
    }

    /// Whether this record is the terminal message of a task delivery
    #[must_use]
    pub fn is_delivery(&self) -> bool {
        self.event.is_none()
    }
}
