//! # agent-relay
//!
//! A coordination core for cooperating agent processes - a supervisor, its
//! managers, and their workers - that execute tasks in parallel and report
//! everything through a shared, append-only journal.
//!
//! The crate provides bounded parallel task execution, session lifecycle
//! management, and a durable message log used both for inter-agent
//! delivery and for status reporting. Process hosting (terminal pane,
//! subprocess, remote endpoint) stays behind the [`host::Host`] contract,
//! so the dispatcher works identically over any hosting mechanism.
//!
//! ## Quick Start
//!
//! ```no_run
//! use agent_relay::{Dispatcher, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::builder()
//!         .journal_path("relay.jsonl")
//!         .host_program("my-agent-host")
//!         .max_concurrent_sessions(10)
//!         .build()?;
//!
//!     let dispatcher = Dispatcher::new(config)?;
//!     dispatcher.submit("worker1", "summarize the findings").await?;
//!
//!     let snapshot = dispatcher.status().await?;
//!     log::info!("{} task(s) queued", snapshot.queued);
//!
//!     dispatcher.stop_all().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`]: Identities, tasks, journal records, session states
//! - [`journal`]: The append-only message log - the single source of truth
//! - [`queue`]: Per-identity FIFO task queue without cross-identity
//!   head-of-line blocking
//! - [`dispatcher`]: The scheduling loop enforcing the session bound
//! - [`status`]: Derived, recomputed system snapshots
//! - [`host`]: The session host contract and the subprocess implementation
//! - [`config`]: Relay configuration with a builder
//! - [`error`]: Error types and handling
//!
//! ## Failure Model
//!
//! Session-local failures (host unavailable, readiness timeout, delivery
//! failure, host exit) are recorded in the journal and surfaced as task
//! state - they are data, not control flow, and never cross the submission
//! boundary as errors. Only a journal persistence failure is fatal: the
//! journal is the source of truth, so the system halts cleanly rather than
//! operate with unrecorded state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod journal;
pub mod queue;
pub mod status;
pub mod types;

// Re-export commonly used types for external API
pub use config::{RelayConfig, RelayConfigBuilder, DEFAULT_MAX_CONCURRENT_SESSIONS, DEFAULT_ROLES};
pub use dispatcher::Dispatcher;
pub use error::{RelayError, Result};
pub use host::{Host, HostFactory, SubprocessHost, SubprocessHostFactory};
pub use journal::{LogEntry, MessageLog};
pub use queue::TaskQueue;
pub use status::{AgentStatus, StatusReporter, SystemSnapshot};
pub use types::{
    AgentIdentity, DeliveryOutcome, LifecycleEvent, MessageRecord, SessionState, Task, TaskId,
    TaskState,
};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
