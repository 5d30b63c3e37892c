//! Durable session checkpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A small durable record of what the engine was doing.
///
/// Written periodically while idle and on every state transition of an
/// active run; read once at startup to decide whether an interrupted run
/// should be resumed.
///
/// # Invariants
///
/// - `in_flight` is non-empty only while `was_processing` is true
/// - `last_activity_ms` is refreshed on every write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    /// Last activity timestamp, milliseconds since the Unix epoch.
    pub last_activity_ms: u64,
    /// Whether a run was in progress when this was written.
    pub was_processing: bool,
    /// Tasks that were mid-flight at the time of the write.
    pub in_flight: Vec<Uuid>,
    /// Pending-count snapshot for diagnostics.
    pub pending_count: u64,
}

impl SessionCheckpoint {
    /// An idle checkpoint with no run in progress.
    pub fn idle(now_ms: u64, pending_count: u64) -> Self {
        Self {
            last_activity_ms: now_ms,
            was_processing: false,
            in_flight: Vec::new(),
            pending_count,
        }
    }

    /// A checkpoint recording an active run with the given in-flight task.
    pub fn processing(now_ms: u64, in_flight: Vec<Uuid>, pending_count: u64) -> Self {
        Self {
            last_activity_ms: now_ms,
            was_processing: true,
            in_flight,
            pending_count,
        }
    }

    /// Returns true if this checkpoint is older than the recency window.
    ///
    /// Stale checkpoints are discarded rather than resumed.
    pub fn is_stale(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) > window_ms
    }

    /// Returns true if this checkpoint indicates an interrupted run worth
    /// resuming.
    pub fn needs_recovery(&self, now_ms: u64, window_ms: u64) -> bool {
        self.was_processing && !self.is_stale(now_ms, window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_checkpoint() {
        let cp = SessionCheckpoint::idle(1000, 5);
        assert!(!cp.was_processing);
        assert!(cp.in_flight.is_empty());
        assert_eq!(cp.pending_count, 5);
    }

    #[test]
    fn staleness_window() {
        let cp = SessionCheckpoint::processing(1000, vec![Uuid::new_v4()], 3);

        assert!(!cp.is_stale(1000, 500));
        assert!(!cp.is_stale(1500, 500));
        assert!(cp.is_stale(1501, 500));
        // Clock skew: a checkpoint from the "future" is not stale.
        assert!(!cp.is_stale(0, 500));
    }

    #[test]
    fn recovery_requires_processing_and_recency() {
        let idle = SessionCheckpoint::idle(1000, 0);
        assert!(!idle.needs_recovery(1100, 500));

        let active = SessionCheckpoint::processing(1000, vec![Uuid::new_v4()], 1);
        assert!(active.needs_recovery(1100, 500));
        assert!(!active.needs_recovery(2000, 500));
    }
}
