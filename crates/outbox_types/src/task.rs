//! Queued task types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when parsing a task enum from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseTypeError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// The kind of change a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Create a new resource remotely.
    Create,
    /// Update an existing resource.
    Update,
    /// Delete a resource.
    Delete,
    /// Handler-defined operation.
    Custom,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Create => "create",
            TaskKind::Update => "update",
            TaskKind::Delete => "delete",
            TaskKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(TaskKind::Create),
            "update" => Ok(TaskKind::Update),
            "delete" => Ok(TaskKind::Delete),
            "custom" => Ok(TaskKind::Custom),
            other => Err(ParseTypeError {
                kind: "task kind",
                value: other.into(),
            }),
        }
    }
}

/// Scheduling priority of a task.
///
/// The derived `Ord` sorts by urgency: `Critical` first, `Low` last.
/// The queue relies on this ordering being total and deterministic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Must be applied before anything else.
    Critical,
    /// Applied before normal traffic.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// First to be pruned when the queue is full.
    Low,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskPriority {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            other => Err(ParseTypeError {
                kind: "task priority",
                value: other.into(),
            }),
        }
    }
}

/// Per-task policy for resolving write conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The local payload overwrites the server version.
    ClientWins,
    /// The server version is accepted and the local change dropped.
    ServerWins,
    /// A registered resolver merges the two versions.
    Merge,
    /// No automatic resolution; the task stays queued for manual handling.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy permits automatic resolution.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictPolicy::ClientWins => "client-wins",
            ConflictPolicy::ServerWins => "server-wins",
            ConflictPolicy::Merge => "merge",
            ConflictPolicy::Manual => "manual",
        };
        f.write_str(s)
    }
}

impl FromStr for ConflictPolicy {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client-wins" => Ok(ConflictPolicy::ClientWins),
            "server-wins" => Ok(ConflictPolicy::ServerWins),
            "merge" => Ok(ConflictPolicy::Merge),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(ParseTypeError {
                kind: "conflict policy",
                value: other.into(),
            }),
        }
    }
}

/// Caller-supplied description of a change to enqueue.
///
/// The queue store turns a spec into a [`Task`] by assigning the id,
/// enqueue timestamp, sequence number, and zeroed retry count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    /// The kind of change.
    pub kind: TaskKind,
    /// Resource category used for handler dispatch.
    pub category: String,
    /// Opaque resource body.
    pub payload: Vec<u8>,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Retry cap; `None` means the engine default.
    pub max_retries: Option<u32>,
    /// Conflict policy; `None` means no automatic resolution preference.
    pub conflict_policy: Option<ConflictPolicy>,
    /// Opaque metadata passed through unmodified.
    pub metadata: BTreeMap<String, String>,
}

impl TaskSpec {
    /// Creates a spec with default priority and no policy overrides.
    pub fn new(kind: TaskKind, category: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            category: category.into(),
            payload,
            priority: TaskPriority::Normal,
            max_retries: None,
            conflict_policy: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the retry cap for this task.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One pending change awaiting remote application.
///
/// Immutable after creation except for `retry_count` (mutated only by the
/// sync runner while processing) and `payload` (replaced once when a
/// conflict resolver produces a merged body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id assigned at enqueue time.
    pub id: Uuid,
    /// The kind of change.
    pub kind: TaskKind,
    /// Resource category used for handler dispatch.
    pub category: String,
    /// Opaque resource body.
    pub payload: Vec<u8>,
    /// Enqueue timestamp, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Store-assigned strictly increasing sequence number.
    ///
    /// Breaks FIFO ties between tasks enqueued in the same millisecond.
    pub seq: u64,
    /// Number of retryable failures so far.
    pub retry_count: u32,
    /// Retry cap; the task is terminally dropped once reached.
    pub max_retries: u32,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Conflict policy, if any.
    pub conflict_policy: Option<ConflictPolicy>,
    /// Opaque metadata passed through unmodified.
    pub metadata: BTreeMap<String, String>,
}

impl Task {
    /// The queue ordering key: priority band, then FIFO within the band.
    pub fn sort_key(&self) -> (TaskPriority, u64, u64) {
        (self.priority, self.created_at, self.seq)
    }

    /// Returns true once the retry cap has been consumed.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}
