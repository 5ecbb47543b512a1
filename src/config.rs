//! Relay configuration
//!
//! This module contains the main configuration for the relay core,
//! including a builder pattern for easy configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RelayError, Result};

/// Default bound on concurrently live sessions
pub const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 10;

/// The fixed role set the original coordination scheme ships with
///
/// Used by the binary's eager-start mode; the library itself creates
/// sessions lazily on first task.
pub const DEFAULT_ROLES: [&str; 5] = ["president", "boss1", "worker1", "worker2", "worker3"];

/// Main configuration for the relay core
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Path of the append-only journal file
    pub journal_path: PathBuf,

    /// Bound on sessions in Starting/Ready/Busy at any moment
    pub max_concurrent_sessions: usize,

    /// How long a starting host may take to signal readiness
    pub readiness_timeout: Duration,

    /// How long a delivery may wait for the host's acknowledgment
    pub delivery_timeout: Duration,

    /// Ready sessions idle longer than this are stopped to free capacity
    pub idle_timeout: Duration,

    /// Bound on `stop_all`; survivors are forcibly terminated after this
    pub shutdown_timeout: Duration,

    /// Program spawned for each session host
    pub host_program: String,

    /// Arguments for the host program; `{identity}` is substituted
    pub host_args: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            journal_path: PathBuf::from("agent-relay.jsonl"),
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            readiness_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            host_program: String::from("agent-relay-host"),
            host_args: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Create a new builder for `RelayConfig`
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// Returns `InvalidConfig` for a zero session bound, an empty host
    /// program, or a zero readiness/delivery timeout.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(RelayError::invalid_config(
                "max_concurrent_sessions must be at least 1",
            ));
        }
        if self.host_program.trim().is_empty() {
            return Err(RelayError::invalid_config("host_program must not be empty"));
        }
        if self.readiness_timeout.is_zero() || self.delivery_timeout.is_zero() {
            return Err(RelayError::invalid_config(
                "readiness_timeout and delivery_timeout must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Builder for `RelayConfig`
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Set the journal path
    #[must_use]
    pub fn journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.journal_path = path.into();
        self
    }

    /// Set the session concurrency bound
    #[must_use]
    pub fn max_concurrent_sessions(mut self, max: usize) -> Self {
        self.config.max_concurrent_sessions = max;
        self
    }

    /// Set the host readiness timeout
    #[must_use]
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.config.readiness_timeout = timeout;
        self
    }

    /// Set the delivery acknowledgment timeout
    #[must_use]
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    /// Set the idle session timeout
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the graceful shutdown bound
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the host program
    #[must_use]
    pub fn host_program(mut self, program: impl Into<String>) -> Self {
        self.config.host_program = program.into();
        self
    }

    /// Set the host program arguments (`{identity}` is substituted)
    #[must_use]
    pub fn host_args(mut self, args: Vec<String>) -> Self {
        self.config.host_args = args;
        self
    }

    /// Validate and build the configuration
    ///
    /// # Errors
    /// Returns `InvalidConfig` if validation fails.
    pub fn build(self) -> Result<RelayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = RelayConfig::builder()
            .journal_path("/tmp/test.jsonl")
            .max_concurrent_sessions(3)
            .idle_timeout(Duration::from_millis(250))
            .build()
            .unwrap();

        assert_eq!(config.max_concurrent_sessions, 3);
        assert_eq!(config.idle_timeout, Duration::from_millis(250));
        assert_eq!(config.journal_path, PathBuf::from("/tmp/test.jsonl"));
    }

    #[test]
    fn zero_session_bound_rejected() {
        let result = RelayConfig::builder().max_concurrent_sessions(0).build();
        assert!(matches!(result, Err(RelayError::InvalidConfig(_))));
    }

    #[test]
    fn empty_host_program_rejected() {
        let result = RelayConfig::builder().host_program("  ").build();
        assert!(matches!(result, Err(RelayError::InvalidConfig(_))));
    }
}
