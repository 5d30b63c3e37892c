//! Checkpoint persistence.

use crate::persist::{decode_cbor, encode_cbor, StateStore};
use outbox_types::SessionCheckpoint;
use std::sync::Arc;
use tracing::warn;

/// Loads and saves the durable session checkpoint.
///
/// Checkpoint writes are best-effort: a failed write is logged and
/// swallowed, since a missing checkpoint only costs one recovery
/// opportunity, never correctness of the queue itself.
pub struct CheckpointManager {
    state: Arc<dyn StateStore>,
    key: String,
}

impl CheckpointManager {
    /// Creates a manager persisting under `key`.
    pub fn new(state: Arc<dyn StateStore>, key: impl Into<String>) -> Self {
        Self {
            state,
            key: key.into(),
        }
    }

    /// Loads the persisted checkpoint, if any. Undecodable state is
    /// discarded with a warning.
    pub fn load(&self) -> Option<SessionCheckpoint> {
        let bytes = match self.state.load(&self.key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to load session checkpoint");
                return None;
            }
        };

        match decode_cbor(&bytes) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!(error = %e, "discarding undecodable session checkpoint");
                None
            }
        }
    }

    /// Persists the checkpoint.
    pub fn save(&self, checkpoint: &SessionCheckpoint) {
        let result =
            encode_cbor(checkpoint).and_then(|bytes| self.state.save(&self.key, &bytes));
        if let Err(e) = result {
            warn!(error = %e, "failed to persist session checkpoint");
        }
    }

    /// Removes the persisted checkpoint.
    pub fn discard(&self) {
        if let Err(e) = self.state.remove(&self.key) {
            warn!(error = %e, "failed to remove session checkpoint");
        }
    }
}
