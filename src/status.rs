//! Derived system status
//!
//! Answers "what is the state of the system" without mutating it. The
//! reporter folds committed journal records into a `SystemSnapshot`; it
//! never reads the dispatcher's live tables, so a status query can run
//! concurrently with active dispatching and still see a self-consistent
//! view - everything it reports has already been committed to the journal.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::journal::MessageLog;
use crate::types::{
    AgentIdentity, DeliveryOutcome, LifecycleEvent, MessageRecord, SessionState, TaskId, TaskState,
};

/// Per-agent slice of a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    /// Session state as derived from lifecycle records
    pub state: SessionState,

    /// Timestamp of the last delivery to this agent
    pub last_seen: Option<DateTime<Utc>>,

    /// Payload of the last delivery to this agent
    pub last_payload: Option<String>,

    /// Deliveries that reached this agent
    pub delivered: usize,

    /// Deliveries to this agent that failed
    pub failed: usize,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Terminated,
            last_seen: None,
            last_payload: None,
            delivered: 0,
            failed: 0,
        }
    }
}

/// Point-in-time view of the whole system, derived from the journal
///
/// Never stored; recomputed (incrementally) on each status query.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,

    /// Sequence number the fold has consumed up to (exclusive)
    pub folded_seq: u64,

    /// Per-agent status, keyed by identity
    pub agents: BTreeMap<AgentIdentity, AgentStatus>,

    /// Tasks waiting for an admissible session
    pub queued: usize,

    /// Tasks handed to a session, not yet terminal
    pub dispatched: usize,

    /// Tasks whose payload reached its host
    pub delivered: usize,

    /// Tasks that failed
    pub failed: usize,

    /// Sessions currently in Starting/Ready/Busy
    pub live_sessions: usize,

    /// The configured concurrency bound
    pub max_concurrent_sessions: usize,
}

impl SystemSnapshot {
    /// Total tasks ever submitted
    #[must_use]
    pub fn total_tasks(&self) -> usize {
        self.queued + self.dispatched + self.delivered + self.failed
    }

    /// Whether no task is queued or in flight
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.queued == 0 && self.dispatched == 0
    }
}

/// Incremental fold state, cached between snapshots
#[derive(Clone, Default)]
struct FoldState {
    next_seq: u64,
    agents: BTreeMap<AgentIdentity, AgentStatus>,
    /// States of non-terminal tasks only; terminal tasks fold into counters
    open_tasks: HashMap<TaskId, TaskState>,
    queued: usize,
    dispatched: usize,
    delivered: usize,
    failed: usize,
}

impl FoldState {
    fn apply(&mut self, record: &MessageRecord) {
        match record.event {
            Some(LifecycleEvent::TaskQueued) => {
                if let Some(task) = &record.task {
                    self.open_tasks.insert(task.clone(), TaskState::Queued);
                    self.queued += 1;
                }
            }
            Some(LifecycleEvent::TaskDispatched) => {
                if let Some(task) = &record.task {
                    if self.open_tasks.insert(task.clone(), TaskState::Dispatched)
                        == Some(TaskState::Queued)
                    {
                        self.queued = self.queued.saturating_sub(1);
                        self.dispatched += 1;
                    }
                }
                let agent = self.agents.entry(record.target.clone()).or_default();
                if agent.state.is_live() {
                    agent.state = SessionState::Busy;
                }
            }
            Some(LifecycleEvent::SessionStarting) => {
                self.agents.entry(record.target.clone()).or_default().state =
                    SessionState::Starting;
            }
            Some(LifecycleEvent::SessionReady) => {
                let agent = self.agents.entry(record.target.clone()).or_default();
                // A dispatched task may already be in flight on this session
                if agent.state != SessionState::Busy {
                    agent.state = SessionState::Ready;
                }
            }
            Some(LifecycleEvent::SessionStopping) => {
                self.agents.entry(record.target.clone()).or_default().state =
                    SessionState::Stopping;
            }
            Some(LifecycleEvent::SessionStopped) | Some(LifecycleEvent::SessionTerminated) => {
                self.agents.entry(record.target.clone()).or_default().state =
                    SessionState::Terminated;
            }
            None => self.apply_delivery(record),
        }
    }

    fn apply_delivery(&mut self, record: &MessageRecord) {
        if let Some(task) = &record.task {
            // Exactly one terminal record counts per task; a duplicate
            // (e.g. a forced termination racing a completing worker) is
            // ignored so totals always sum to submissions
            if self.open_tasks.remove(task).is_none() {
                return;
            }
            self.dispatched = self.dispatched.saturating_sub(1);
            match record.outcome {
                DeliveryOutcome::Failed => self.failed += 1,
                _ => self.delivered += 1,
            }
        }

        let agent = self.agents.entry(record.target.clone()).or_default();
        agent.last_seen = Some(record.ts);
        agent.last_payload = Some(record.payload.clone());
        match record.outcome {
            DeliveryOutcome::Failed => agent.failed += 1,
            _ => agent.delivered += 1,
        }
        if agent.state == SessionState::Busy {
            agent.state = SessionState::Ready;
        }
    }

    fn snapshot(&self, max_concurrent_sessions: usize) -> SystemSnapshot {
        let live_sessions = self
            .agents
            .values()
            .filter(|a| a.state.is_live())
            .count();
        SystemSnapshot {
            taken_at: Utc::now(),
            folded_seq: self.next_seq,
            agents: self.agents.clone(),
            queued: self.queued,
            dispatched: self.dispatched,
            delivered: self.delivered,
            failed: self.failed,
            live_sessions,
            max_concurrent_sessions,
        }
    }
}

/// Read-only status aggregation over the journal
pub struct StatusReporter {
    journal: Arc<MessageLog>,
    max_concurrent_sessions: usize,
    fold: Mutex<FoldState>,
}

impl StatusReporter {
    /// Create a reporter over `journal`
    #[must_use]
    pub fn new(journal: Arc<MessageLog>, max_concurrent_sessions: usize) -> Self {
        Self {
            journal,
            max_concurrent_sessions,
            fold: Mutex::new(FoldState::default()),
        }
    }

    /// Compute a snapshot, resuming the fold from the cached position
    ///
    /// The fold is append-only, so resuming from the last consumed
    /// sequence number is always valid - no invalidation is ever needed.
    ///
    /// # Errors
    /// Returns `Persistence` if the journal cannot be read.
    pub async fn snapshot(&self) -> Result<SystemSnapshot> {
        let mut state = self.fold.lock().clone();

        let mut stream = self.journal.read_from(state.next_seq);
        while let Some(record) = stream.next().await {
            let record = record?;
            state.apply(&record);
            state.next_seq = record.seq + 1;
        }
        drop(stream);

        let snapshot = state.snapshot(self.max_concurrent_sessions);

        // Another snapshot may have folded further in the meantime; keep
        // whichever state is ahead
        let mut cached = self.fold.lock();
        if state.next_seq > cached.next_seq {
            *cached = state;
        }

        Ok(snapshot)
    }
}
