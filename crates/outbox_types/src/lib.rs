//! # Outbox Types
//!
//! Task, outcome, and checkpoint types for the outbox sync queue.
//!
//! This crate is the shared vocabulary between the engine and its
//! collaborators: the task record queued for remote application, the
//! per-task outcome of a sync attempt, and the durable session checkpoint
//! used for crash recovery. It carries no engine logic.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod outcome;
mod task;

pub use checkpoint::SessionCheckpoint;
pub use outcome::SyncOutcome;
pub use task::{ConflictPolicy, ParseTypeError, Task, TaskKind, TaskPriority, TaskSpec};
