//! Durable, priority-ordered task queue.

use crate::error::EngineResult;
use crate::persist::{decode_cbor, encode_cbor, StateStore};
use outbox_types::{Task, TaskPriority, TaskSpec};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Persisted shape of the queue.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedQueue {
    next_seq: u64,
    tasks: Vec<Task>,
}

#[derive(Debug)]
struct QueueInner {
    tasks: Vec<Task>,
    next_seq: u64,
}

/// What happened to a task after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureDisposition {
    /// The retry cap was consumed; the task was removed.
    Exhausted,
    /// The task stays queued with the incremented retry count.
    Retained,
    /// The task was no longer in the queue.
    Missing,
}

/// Ordered collection of pending tasks with durable persistence.
///
/// Every mutating call rewrites the full task list to the state store.
/// A persistence failure is logged and does not surface through the
/// public API; the in-memory state stays authoritative for the current
/// process lifetime.
///
/// # Pruning
///
/// The capacity is a soft cap. When an enqueue finds the store full it
/// first drops up to 10% of capacity, preferring the oldest `Low`-priority
/// tasks. If no low-priority tasks exist the store grows past the cap
/// rather than silently dropping higher-priority work.
pub struct QueueStore {
    inner: Mutex<QueueInner>,
    state: Arc<dyn StateStore>,
    key: String,
    capacity: usize,
    default_max_retries: u32,
    pruned_total: AtomicU64,
}

impl QueueStore {
    /// Opens the queue, loading any persisted task list under `key`.
    ///
    /// A corrupt persisted value is discarded with a warning rather than
    /// refusing to start.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store fails while loading.
    pub fn open(
        state: Arc<dyn StateStore>,
        key: String,
        capacity: usize,
        default_max_retries: u32,
    ) -> EngineResult<Self> {
        let inner = match state.load(&key)? {
            Some(bytes) => match decode_cbor::<PersistedQueue>(&bytes) {
                Ok(persisted) => {
                    debug!(count = persisted.tasks.len(), "loaded persisted queue");
                    QueueInner {
                        tasks: persisted.tasks,
                        next_seq: persisted.next_seq,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "discarding undecodable persisted queue");
                    QueueInner {
                        tasks: Vec::new(),
                        next_seq: 1,
                    }
                }
            },
            None => QueueInner {
                tasks: Vec::new(),
                next_seq: 1,
            },
        };

        Ok(Self {
            inner: Mutex::new(inner),
            state,
            key,
            capacity,
            default_max_retries,
            pruned_total: AtomicU64::new(0),
        })
    }

    /// Inserts a new task built from `spec` and returns its id.
    pub fn enqueue(&self, spec: TaskSpec) -> Uuid {
        let mut inner = self.inner.lock();

        if inner.tasks.len() >= self.capacity {
            let dropped = Self::prune(&mut inner.tasks, self.capacity);
            if dropped > 0 {
                self.pruned_total.fetch_add(dropped as u64, Ordering::Relaxed);
                warn!(dropped, "queue at capacity, pruned oldest low-priority tasks");
            } else {
                warn!(
                    capacity = self.capacity,
                    "queue at capacity with no low-priority tasks, growing past cap"
                );
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let task = Task {
            id: Uuid::new_v4(),
            kind: spec.kind,
            category: spec.category,
            payload: spec.payload,
            created_at: crate::now_millis(),
            seq,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(self.default_max_retries),
            priority: spec.priority,
            conflict_policy: spec.conflict_policy,
            metadata: spec.metadata,
        };
        let id = task.id;

        debug!(%id, category = %task.category, priority = %task.priority, "enqueued task");
        inner.tasks.push(task);
        self.persist(&inner);
        id
    }

    /// Removes up to 10% of capacity, oldest `Low`-priority first.
    /// Returns how many were dropped.
    fn prune(tasks: &mut Vec<Task>, capacity: usize) -> usize {
        let budget = (capacity / 10).max(1);

        let mut low: Vec<(u64, u64, Uuid)> = tasks
            .iter()
            .filter(|t| t.priority == TaskPriority::Low)
            .map(|t| (t.created_at, t.seq, t.id))
            .collect();
        low.sort_unstable();

        let victims: Vec<Uuid> = low.into_iter().take(budget).map(|(_, _, id)| id).collect();
        tasks.retain(|t| !victims.contains(&t.id));
        victims.len()
    }

    /// Deletes a task by id. Returns whether a deletion occurred.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|t| t.id != id);
        let removed = inner.tasks.len() != before;
        if removed {
            self.persist(&inner);
        }
        removed
    }

    /// Looks up a task by id.
    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.inner.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    /// Returns all pending tasks in processing order: priority band first
    /// (critical before low), FIFO within a band.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks = self.inner.lock().tasks.clone();
        tasks.sort_by_key(Task::sort_key);
        tasks
    }

    /// Returns the first `limit` tasks in processing order.
    pub(crate) fn batch(&self, limit: usize) -> Vec<Task> {
        let mut tasks = self.list();
        tasks.truncate(limit);
        tasks
    }

    /// Empties the store and persists the empty state.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.tasks.clear();
        self.persist(&inner);
    }

    /// Drops in-memory tasks without touching the durable copy.
    ///
    /// Used on shutdown so the queue survives into the next process.
    pub(crate) fn reset_in_memory(&self) {
        self.inner.lock().tasks.clear();
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    /// Returns true if no tasks are pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().tasks.is_empty()
    }

    /// Total tasks dropped by capacity pruning so far.
    pub(crate) fn pruned_total(&self) -> u64 {
        self.pruned_total.load(Ordering::Relaxed)
    }

    /// Records a retryable failure: increments the retry count and removes
    /// the task if the cap is now consumed.
    pub(crate) fn record_failure(&self, id: Uuid) -> FailureDisposition {
        let mut inner = self.inner.lock();
        let Some(pos) = inner.tasks.iter().position(|t| t.id == id) else {
            return FailureDisposition::Missing;
        };

        inner.tasks[pos].retry_count += 1;
        let disposition = if inner.tasks[pos].retries_exhausted() {
            inner.tasks.remove(pos);
            FailureDisposition::Exhausted
        } else {
            FailureDisposition::Retained
        };

        self.persist(&inner);
        disposition
    }

    /// Replaces a task's payload with a merged body. Returns the updated
    /// task.
    pub(crate) fn set_payload(&self, id: Uuid, payload: Vec<u8>) -> Option<Task> {
        let mut inner = self.inner.lock();
        let task = inner.tasks.iter_mut().find(|t| t.id == id)?;
        task.payload = payload;
        let updated = task.clone();
        self.persist(&inner);
        Some(updated)
    }

    /// Compensates tasks that were mid-flight when a run was interrupted:
    /// the retry count drops by one (floor zero, the attempt may never
    /// have reached the remote) and the timestamp is refreshed. Returns
    /// how many tasks were adjusted.
    pub(crate) fn recover_in_flight(&self, ids: &[Uuid], now_ms: u64) -> usize {
        let mut inner = self.inner.lock();
        let mut adjusted = 0;
        for task in inner.tasks.iter_mut().filter(|t| ids.contains(&t.id)) {
            task.retry_count = task.retry_count.saturating_sub(1);
            task.created_at = now_ms;
            adjusted += 1;
        }
        if adjusted > 0 {
            self.persist(&inner);
        }
        adjusted
    }

    /// Writes the full task list to the state store. Failures are logged;
    /// in-memory state stays authoritative.
    fn persist(&self, inner: &QueueInner) {
        let persisted = PersistedQueue {
            next_seq: inner.next_seq,
            tasks: inner.tasks.clone(),
        };

        let result = encode_cbor(&persisted).and_then(|bytes| self.state.save(&self.key, &bytes));
        if let Err(e) = result {
            warn!(error = %e, key = %self.key, "failed to persist task queue");
        }
    }
}
