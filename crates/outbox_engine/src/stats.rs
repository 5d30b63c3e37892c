//! Aggregate counters and timing for the engine.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// A point-in-time snapshot of engine statistics.
///
/// Process-lifetime aggregates; not persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Tasks currently queued.
    pub pending_tasks: u64,
    /// Tasks applied successfully.
    pub completed_tasks: u64,
    /// Tasks terminally failed (retry cap reached or no handler).
    pub failed_tasks: u64,
    /// Conflicts resolved automatically.
    pub conflicts_resolved: u64,
    /// Tasks dropped by capacity pruning.
    pub pruned_tasks: u64,
    /// When the last run finished, milliseconds since the Unix epoch.
    pub last_run_ms: Option<u64>,
    /// When the next periodic run is scheduled, milliseconds since epoch.
    pub next_run_ms: Option<u64>,
    /// Smoothed run duration.
    ///
    /// Updated as `(previous + current) / 2`: an exponentially-weighted
    /// average that favors recent run latency, not an arithmetic mean.
    pub avg_run_duration: Duration,
}

/// Shared, clonable holder for engine statistics.
///
/// The sync runner is the single writer for run-derived fields; the
/// scheduler writes `next_run_ms`. Readers get consistent snapshots.
#[derive(Debug, Clone, Default)]
pub struct SharedStats {
    inner: Arc<RwLock<EngineStats>>,
}

impl SharedStats {
    /// Creates zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the current values.
    pub fn snapshot(&self) -> EngineStats {
        self.inner.read().clone()
    }

    /// Records tasks applied successfully.
    pub(crate) fn add_completed(&self, count: u64) {
        self.inner.write().completed_tasks += count;
    }

    /// Records terminal failures.
    pub(crate) fn add_failed(&self, count: u64) {
        self.inner.write().failed_tasks += count;
    }

    /// Records automatically resolved conflicts.
    pub(crate) fn add_conflicts_resolved(&self, count: u64) {
        self.inner.write().conflicts_resolved += count;
    }

    /// Updates the pending gauge.
    pub(crate) fn set_pending(&self, pending: u64) {
        self.inner.write().pending_tasks = pending;
    }

    /// Records when the next periodic run is due.
    pub(crate) fn set_next_run(&self, at_ms: u64) {
        self.inner.write().next_run_ms = Some(at_ms);
    }

    /// Folds a finished run into the aggregates.
    pub(crate) fn finish_run(&self, finished_at_ms: u64, duration: Duration, pending: u64) {
        let mut stats = self.inner.write();
        stats.last_run_ms = Some(finished_at_ms);
        stats.pending_tasks = pending;
        stats.avg_run_duration = (stats.avg_run_duration + duration) / 2;
    }

    /// Resets everything to zero.
    pub(crate) fn clear(&self) {
        *self.inner.write() = EngineStats::default();
    }
}
