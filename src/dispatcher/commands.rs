//! Command and event protocol for the dispatcher
//!
//! The public handle talks to the scheduling loop through
//! `DispatcherCommand`; the loop talks to session workers through
//! `SessionCommand`; workers report back through `SessionEvent`. Channels
//! keep all scheduling state owned by one task, eliminating shared locks.

use tokio::sync::oneshot;

use crate::error::{RelayError, Result};
use crate::types::{AgentIdentity, DeliveryOutcome, Task, TaskId};

/// Commands from the public `Dispatcher` handle to the scheduling loop
pub(super) enum DispatcherCommand {
    /// Enqueue a task for delivery
    Submit {
        /// Identity submitting the task
        source: AgentIdentity,
        /// Identity the payload is addressed to
        target: AgentIdentity,
        /// Opaque message body
        payload: String,
        /// Channel to send the assigned task id back
        response_tx: oneshot::Sender<Result<TaskId>>,
    },

    /// Eagerly start sessions for a fixed role set
    Prestart {
        /// Identities to start sessions for
        identities: Vec<AgentIdentity>,
        /// Completion signal (sessions may still be starting)
        response_tx: oneshot::Sender<()>,
    },

    /// Gracefully stop all live sessions
    StopAll {
        /// Resolved once every session is Terminated or the shutdown
        /// timeout forced the rest
        response_tx: oneshot::Sender<()>,
    },
}

/// Commands from the scheduling loop to one session worker
pub(super) enum SessionCommand {
    /// Deliver a task to the host
    Deliver {
        /// The task to deliver
        task: Task,
    },

    /// Stop the host gracefully and exit
    Shutdown,
}

/// Events from session workers back to the scheduling loop
pub(super) enum SessionEvent {
    /// The host signalled readiness
    Ready {
        /// Session identity
        identity: AgentIdentity,
    },

    /// Host creation or readiness failed; the session never went live
    StartFailed {
        /// Session identity
        identity: AgentIdentity,
        /// The task that triggered the start, if any (its terminal record
        /// is already in the journal)
        task: Option<Task>,
        /// What went wrong
        error: RelayError,
    },

    /// A delivery reached the host; its record is in the journal
    Delivered {
        /// Session identity
        identity: AgentIdentity,
        /// Task that was delivered
        task_id: TaskId,
        /// Sent or Acknowledged
        outcome: DeliveryOutcome,
    },

    /// A delivery failed; its terminal record is in the journal and the
    /// worker is tearing the host down
    DeliveryFailed {
        /// Session identity
        identity: AgentIdentity,
        /// Task that failed
        task_id: TaskId,
        /// What went wrong
        error: RelayError,
    },

    /// The worker stopped its host and exited
    Stopped {
        /// Session identity
        identity: AgentIdentity,
    },

    /// The worker hit a fatal journal failure; the system must halt
    Fatal {
        /// The persistence error
        error: RelayError,
    },

    /// Internal timer: the `stop_all` grace period elapsed
    ShutdownDeadline,
}
