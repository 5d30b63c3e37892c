//! The sync runner: applies one batch of queued tasks.

use crate::checkpoint::CheckpointManager;
use crate::error::ApplyError;
use crate::registry::{HandlerRegistry, TaskHandler};
use crate::stats::SharedStats;
use crate::store::{FailureDisposition, QueueStore};
use outbox_types::{SessionCheckpoint, SyncOutcome, Task};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Resets the run gate when a run ends, including on panic unwind.
struct RunGate<'a>(&'a AtomicBool);

impl Drop for RunGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Applies batches of queued tasks through registered handlers.
///
/// At most one run is active at a time: a trigger while a run is in
/// progress is a no-op returning an empty outcome list. Tasks are
/// processed sequentially in queue order, so outcome order and queue
/// mutation order are deterministic.
pub struct SyncRunner {
    queue: Arc<QueueStore>,
    registry: Arc<HandlerRegistry>,
    stats: SharedStats,
    checkpoint: Arc<CheckpointManager>,
    batch_size: usize,
    running: AtomicBool,
}

impl SyncRunner {
    /// Creates a runner over the given collaborators.
    pub(crate) fn new(
        queue: Arc<QueueStore>,
        registry: Arc<HandlerRegistry>,
        stats: SharedStats,
        checkpoint: Arc<CheckpointManager>,
        batch_size: usize,
    ) -> Self {
        Self {
            queue,
            registry,
            stats,
            checkpoint,
            batch_size,
            running: AtomicBool::new(false),
        }
    }

    /// Returns true while a run is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs one batch and returns the per-task outcomes in batch order.
    ///
    /// Returns an empty list immediately if another run is already active
    /// or the queue is empty.
    pub fn run(&self) -> Vec<SyncOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync run already in progress, skipping trigger");
            return Vec::new();
        }
        let _gate = RunGate(&self.running);

        let batch = self.queue.batch(self.batch_size);
        if batch.is_empty() {
            return Vec::new();
        }

        let start = Instant::now();
        info!(batch = batch.len(), "starting sync run");

        let mut outcomes = Vec::with_capacity(batch.len());
        for task in batch {
            let pending = self.queue.len() as u64;
            self.checkpoint.save(&SessionCheckpoint::processing(
                crate::now_millis(),
                vec![task.id],
                pending,
            ));

            let outcome = self.process_task(task);
            outcomes.push(outcome);

            // In-flight marker cleared; the run itself is still active.
            self.checkpoint.save(&SessionCheckpoint::processing(
                crate::now_millis(),
                Vec::new(),
                self.queue.len() as u64,
            ));
        }

        let duration = start.elapsed();
        let pending = self.queue.len() as u64;
        self.stats.finish_run(crate::now_millis(), duration, pending);
        self.checkpoint
            .save(&SessionCheckpoint::idle(crate::now_millis(), pending));

        let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
        info!(
            total = outcomes.len(),
            succeeded,
            pending,
            ?duration,
            "sync run finished"
        );
        outcomes
    }

    fn process_task(&self, task: Task) -> SyncOutcome {
        let Some(handler) = self.registry.handler(&task.category) else {
            // No handler is a terminal failure, same as an exhausted retry
            // cap: removed and counted, never retried.
            self.queue.remove(task.id);
            self.stats.add_failed(1);
            error!(id = %task.id, category = %task.category, "no handler registered, dropping task");
            return SyncOutcome::failure(
                task.id,
                format!("no handler registered for category {:?}", task.category),
            );
        };

        debug!(id = %task.id, category = %task.category, kind = %task.kind, "applying task");
        match handler.apply(&task) {
            Ok(remote_version) => {
                self.queue.remove(task.id);
                self.stats.add_completed(1);
                SyncOutcome::success(task.id, remote_version)
            }
            Err(ApplyError::Conflict { server_version }) => {
                self.handle_conflict(handler.as_ref(), task, server_version)
            }
            Err(ApplyError::Failed(message)) => {
                self.record_retryable_failure(&task, message, false)
            }
        }
    }

    /// Routes a reported conflict through the task's policy and any
    /// registered resolver.
    fn handle_conflict(
        &self,
        handler: &dyn TaskHandler,
        task: Task,
        server_version: Option<Vec<u8>>,
    ) -> SyncOutcome {
        let policy_allows = task.conflict_policy.map_or(true, |p| p.auto_resolves());
        if !policy_allows {
            debug!(id = %task.id, "conflict under manual policy, leaving task queued");
            return SyncOutcome::conflict(
                task.id,
                "conflict requires manual resolution",
                server_version,
            );
        }

        let Some(resolver) = self.registry.resolver(&task.category) else {
            debug!(id = %task.id, category = %task.category, "conflict with no resolver registered");
            return SyncOutcome::conflict(
                task.id,
                format!("no conflict resolver registered for category {:?}", task.category),
                server_version,
            );
        };

        let merged = match resolver.resolve(&task, server_version.as_deref()) {
            Ok(merged) => merged,
            Err(e) => {
                debug!(id = %task.id, error = %e, "conflict resolver failed");
                return SyncOutcome::conflict(task.id, e.to_string(), server_version);
            }
        };

        let Some(merged_task) = self.queue.set_payload(task.id, merged) else {
            // Removed out from under us between snapshot and now.
            return SyncOutcome::conflict(task.id, "task no longer queued", server_version);
        };

        // One resolution attempt per slot. The re-apply does not consume a
        // retry: it is a resolution attempt, not a failure.
        match handler.apply(&merged_task) {
            Ok(remote_version) => {
                self.queue.remove(merged_task.id);
                self.stats.add_completed(1);
                self.stats.add_conflicts_resolved(1);
                let mut outcome = SyncOutcome::success(merged_task.id, remote_version);
                outcome.conflict_detected = true;
                outcome
            }
            Err(ApplyError::Conflict { server_version }) => SyncOutcome::conflict(
                merged_task.id,
                "conflict persisted after merge",
                server_version,
            ),
            Err(ApplyError::Failed(message)) => {
                self.record_retryable_failure(&merged_task, message, true)
            }
        }
    }

    /// Increments the retry count; removes and counts the task if the cap
    /// is consumed.
    fn record_retryable_failure(
        &self,
        task: &Task,
        message: String,
        conflict_detected: bool,
    ) -> SyncOutcome {
        match self.queue.record_failure(task.id) {
            FailureDisposition::Exhausted => {
                self.stats.add_failed(1);
                error!(id = %task.id, error = %message, "retry cap reached, dropping task");
            }
            FailureDisposition::Retained => {
                debug!(id = %task.id, error = %message, "apply failed, task requeued");
            }
            FailureDisposition::Missing => {}
        }

        let mut outcome = SyncOutcome::failure(task.id, message);
        outcome.conflict_detected = conflict_detected;
        outcome
    }
}
