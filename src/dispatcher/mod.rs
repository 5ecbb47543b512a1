//! Task dispatching and session pool management
//!
//! Provides the [`Dispatcher`]: the central scheduler that matches queued
//! tasks to agent sessions under a global concurrency bound, starts and
//! stops sessions, and routes every outcome through the journal.
//!
//! # Module Structure
//!
//! - `core` - Public `Dispatcher` handle
//! - `commands` - Command and event protocol between handle, loop, and workers
//! - `scheduler` - The single scheduling loop owning queue and session table
//! - `session` - Session state and table
//! - `worker` - Per-session background task owning the host

mod commands;
mod core;
mod scheduler;
mod session;
mod worker;

pub use self::core::Dispatcher;
