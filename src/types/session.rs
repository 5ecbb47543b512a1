//! Session lifecycle states

use serde::{Deserialize, Serialize};

/// Lifecycle state of one agent session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Host is being created and has not yet signalled readiness
    Starting,
    /// Host is live and idle; admissible for dispatch
    Ready,
    /// A delivery is in flight
    Busy,
    /// Graceful shutdown requested
    Stopping,
    /// Terminal; the identity may be given a fresh session later
    Terminated,
}

impl SessionState {
    /// Whether the session counts toward the concurrency bound
    ///
    /// Only Starting, Ready, and Busy sessions occupy a slot; a session in
    /// Stopping has already released its capacity.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Ready | Self::Busy)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}
