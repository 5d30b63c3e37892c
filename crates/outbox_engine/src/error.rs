//! Error types for the sync queue engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced at the engine's public API boundary.
///
/// Per-task apply failures never appear here; they are captured in the
/// [`SyncOutcome`](outbox_types::SyncOutcome) list of the run that observed
/// them. Only contract violations and unrecoverable storage problems at
/// construction time are errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The durable state store failed while loading or opening.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A lifecycle method was called before `initialize`.
    #[error("engine not initialized")]
    NotInitialized,
}

/// Errors from the durable state store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode state for persistence.
    #[error("encode error: {0}")]
    Encode(String),

    /// Persisted state could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Error returned by a task handler's apply attempt.
///
/// A [`Conflict`](ApplyError::Conflict) is the sole 409-equivalent signal;
/// every other failure is treated uniformly as retryable regardless of
/// cause. Handlers needing differentiated treatment must encode it
/// themselves.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The remote reported a version mismatch.
    #[error("conflict: remote version differs")]
    Conflict {
        /// The server's current version of the resource, if provided.
        server_version: Option<Vec<u8>>,
    },

    /// Any other failure: network, auth, validation. Retryable.
    #[error("{0}")]
    Failed(String),
}

impl ApplyError {
    /// Creates a conflict error carrying the server's version.
    pub fn conflict(server_version: impl Into<Vec<u8>>) -> Self {
        Self::Conflict {
            server_version: Some(server_version.into()),
        }
    }

    /// Creates a plain retryable failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true for the 409-equivalent conflict signal.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApplyError::Conflict { .. })
    }

    /// Returns true if the failure should consume a retry and requeue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApplyError::Failed(_))
    }
}

/// Error returned by a conflict resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("resolver error: {0}")]
pub struct ResolveError(pub String);

impl ResolveError {
    /// Creates a resolver error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
