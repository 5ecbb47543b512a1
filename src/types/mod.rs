//! Core type definitions
//!
//! # Module Structure
//!
//! - `identifiers` - Newtype wrappers for agent and task identifiers
//! - `task` - Units of work and their lifecycle states
//! - `record` - Immutable journal records and delivery outcomes
//! - `session` - Session lifecycle states

pub mod identifiers;
pub mod record;
pub mod session;
pub mod task;

pub use identifiers::{AgentIdentity, TaskId};
pub use record::{DeliveryOutcome, LifecycleEvent, MessageRecord};
pub use session::SessionState;
pub use task::{Task, TaskState};
