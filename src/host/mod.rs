//! Host layer for agent sessions
//!
//! A host is the environment-specific side of one session: terminal pane,
//! subprocess, in-process worker, or remote endpoint. The dispatcher only
//! ever talks to the [`Host`] contract, so any hosting mechanism that can
//! start, accept a payload, and stop satisfies it.

pub mod subprocess;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AgentIdentity, DeliveryOutcome};

/// Contract for one running agent host
///
/// Implementations must bound `start` by the configured readiness timeout
/// and `deliver` by the delivery timeout; the session worker relies on both
/// returning rather than hanging, so a cancelled delivery never leaks a
/// concurrency slot.
#[async_trait]
pub trait Host: Send {
    /// Start the host and wait until it signals readiness
    ///
    /// # Errors
    /// Returns `HostUnavailable` if the host cannot be created, or
    /// `ReadinessTimeout` if it never signals readiness.
    async fn start(&mut self) -> Result<()>;

    /// Deliver one payload to the host
    ///
    /// # Errors
    /// Returns `DeliveryFailed` if the host rejects the payload, or
    /// `HostTerminated` if the host has exited.
    async fn deliver(&mut self, payload: &str) -> Result<DeliveryOutcome>;

    /// Request graceful termination; idempotent
    ///
    /// # Errors
    /// Returns error only if cleanup itself fails; stopping an already
    /// stopped host is a no-op.
    async fn stop(&mut self) -> Result<()>;

    /// Liveness probe, used before session reuse
    fn is_alive(&mut self) -> bool;
}

/// Creates one boxed host per identity
#[async_trait]
pub trait HostFactory: Send + Sync {
    /// Create a host for `identity`, not yet started
    ///
    /// # Errors
    /// Returns `HostUnavailable` if the hosting mechanism cannot be set up
    /// (e.g. the host binary does not exist).
    async fn create(&self, identity: &AgentIdentity) -> Result<Box<dyn Host>>;
}

pub use subprocess::{SubprocessHost, SubprocessHostFactory};
