//! Per-task results of a sync attempt.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The result of one apply attempt for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// The task this outcome belongs to.
    pub task_id: Uuid,
    /// Whether the apply (or apply-after-merge) succeeded.
    pub succeeded: bool,
    /// Error description on failure.
    pub error: Option<String>,
    /// Whether a version conflict was reported by the remote.
    pub conflict_detected: bool,
    /// Payload returned by the remote: the applied version on success,
    /// or the server side of an unresolved conflict.
    pub remote_version: Option<Vec<u8>>,
}

impl SyncOutcome {
    /// A successful apply.
    pub fn success(task_id: Uuid, remote_version: Option<Vec<u8>>) -> Self {
        Self {
            task_id,
            succeeded: true,
            error: None,
            conflict_detected: false,
            remote_version,
        }
    }

    /// A failed apply.
    pub fn failure(task_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            succeeded: false,
            error: Some(error.into()),
            conflict_detected: false,
            remote_version: None,
        }
    }

    /// A conflict the engine could not resolve automatically.
    pub fn conflict(
        task_id: Uuid,
        error: impl Into<String>,
        server_version: Option<Vec<u8>>,
    ) -> Self {
        Self {
            task_id,
            succeeded: false,
            error: Some(error.into()),
            conflict_detected: true,
            remote_version: server_version,
        }
    }
}
