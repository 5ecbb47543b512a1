//! Error types for the agent relay core

use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// The underlying host for a session could not be created
    #[error("Host unavailable for '{identity}': {message}")]
    HostUnavailable {
        /// Identity the host was being created for
        identity: String,
        /// Reason the host could not be created
        message: String,
    },

    /// The host was created but never signalled readiness
    #[error("Host for '{0}' did not signal readiness in time")]
    ReadinessTimeout(String),

    /// A payload could not be delivered to a live host
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// The host exited before or during a delivery
    #[error("Host terminated: {0}")]
    HostTerminated(String),

    /// The task queue no longer accepts submissions
    #[error("Task queue is closed")]
    QueueClosed,

    /// The journal could not be written; the system cannot proceed safely
    #[error("Journal persistence failure: {0}")]
    Persistence(String),

    /// No live session exists for the given identity
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decode error when reading journal records
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a host-unavailable error
    pub fn host_unavailable(identity: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::HostUnavailable {
            identity: identity.into(),
            message: msg.into(),
        }
    }

    /// Create a readiness-timeout error
    pub fn readiness_timeout(identity: impl Into<String>) -> Self {
        Self::ReadinessTimeout(identity.into())
    }

    /// Create a delivery-failed error
    pub fn delivery_failed(msg: impl Into<String>) -> Self {
        Self::DeliveryFailed(msg.into())
    }

    /// Create a host-terminated error
    pub fn host_terminated(msg: impl Into<String>) -> Self {
        Self::HostTerminated(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a session-not-found error
    pub fn session_not_found(identity: impl Into<String>) -> Self {
        Self::SessionNotFound(identity.into())
    }

    /// Create an invalid-configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Whether this error is fatal to the whole system.
    ///
    /// Session-local failures are recorded in the journal and surfaced as
    /// task state; only a journal write failure forces a clean halt.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
