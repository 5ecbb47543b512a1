//! Session state and table
//!
//! One `Session` per live identity, owned exclusively by the scheduling
//! loop. The table enforces the identity-to-session uniqueness rule and
//! answers the capacity questions the scheduler asks on every pass.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::commands::SessionCommand;
use crate::types::{AgentIdentity, SessionState, Task};

/// One live agent session as the scheduler sees it
pub(super) struct Session {
    /// Lifecycle state; drives admissibility and the concurrency bound
    pub state: SessionState,

    /// When the session was created
    #[allow(dead_code)]
    pub created_at: DateTime<Utc>,

    /// Last dispatch or delivery activity, for idle reaping
    pub last_activity: Instant,

    /// The task currently in flight, if any
    pub current_task: Option<Task>,

    /// Channel to the session worker
    pub command_tx: mpsc::UnboundedSender<SessionCommand>,

    /// The worker task owning the host
    pub worker: JoinHandle<()>,
}

/// Identity-keyed table of live sessions
#[derive(Default)]
pub(super) struct SessionTable {
    sessions: HashMap<AgentIdentity, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &AgentIdentity) -> Option<&Session> {
        self.sessions.get(identity)
    }

    pub fn get_mut(&mut self, identity: &AgentIdentity) -> Option<&mut Session> {
        self.sessions.get_mut(identity)
    }

    pub fn insert(&mut self, identity: AgentIdentity, session: Session) {
        debug_assert!(
            !self.sessions.contains_key(&identity),
            "identity '{identity}' already has a live session"
        );
        self.sessions.insert(identity, session);
    }

    pub fn remove(&mut self, identity: &AgentIdentity) -> Option<Session> {
        self.sessions.remove(identity)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions counting toward the concurrency bound
    pub fn live_count(&self) -> usize {
        self.sessions.values().filter(|s| s.state.is_live()).count()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&AgentIdentity, &mut Session)> {
        self.sessions.iter_mut()
    }

    /// Drain every session out of the table (forced shutdown)
    pub fn drain(&mut self) -> impl Iterator<Item = (AgentIdentity, Session)> + '_ {
        self.sessions.drain()
    }

    /// Identities of Ready sessions idle longer than `idle_timeout`
    pub fn idle_ready(&self, idle_timeout: Duration) -> Vec<AgentIdentity> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Ready && s.last_activity.elapsed() >= idle_timeout)
            .map(|(identity, _)| identity.clone())
            .collect()
    }
}
