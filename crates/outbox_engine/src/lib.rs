//! # Outbox Engine
//!
//! Offline sync queue engine: queues locally-made changes while a client
//! is disconnected, replays them against a remote API when connectivity
//! returns, detects and resolves write conflicts, and survives process
//! interruption without losing or duplicating work.
//!
//! This crate provides:
//! - Durable, priority-ordered task queue with capacity pruning
//! - Per-category apply handlers and pluggable conflict resolvers
//! - Bounded retry with terminal-failure accounting
//! - Session checkpointing and crash recovery
//! - Periodic and connectivity-driven scheduling
//!
//! ## Architecture
//!
//! The engine is a single logical writer: all queue mutations and stats
//! updates during a run happen inside the sync runner's batch loop, which
//! is gated to at-most-one-active-run by an atomic flag. Callers may
//! enqueue and remove tasks concurrently with a run; they synchronize
//! only on the queue's own critical section.
//!
//! ## Key Invariants
//!
//! - Pending tasks are always ordered by priority, then FIFO
//! - A task is never attempted by two concurrent runs
//! - A task at its retry cap never survives a completed sync attempt
//! - A persistence failure never fails a public API call
//! - Crash recovery never increases a task's retry count

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod engine;
mod error;
mod persist;
mod registry;
mod runner;
mod scheduler;
mod stats;
mod store;

pub use checkpoint::CheckpointManager;
pub use config::EngineConfig;
pub use engine::OutboxEngine;
pub use error::{ApplyError, EngineError, EngineResult, ResolveError, StoreError};
pub use persist::{FileStateStore, MemoryStateStore, StateStore};
pub use registry::{ConflictResolver, HandlerRegistry, TaskHandler};
pub use scheduler::ConnectivityProbe;
pub use stats::EngineStats;
pub use store::QueueStore;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
