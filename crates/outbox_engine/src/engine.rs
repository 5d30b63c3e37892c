//! Public engine facade.

use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::persist::StateStore;
use crate::registry::{ConflictResolver, HandlerRegistry, TaskHandler};
use crate::runner::SyncRunner;
use crate::scheduler::{ConnectivityProbe, ScheduleParams, Scheduler};
use crate::stats::{EngineStats, SharedStats};
use crate::store::QueueStore;
use outbox_types::{SessionCheckpoint, SyncOutcome, Task, TaskSpec};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// The offline sync queue engine.
///
/// Owns the durable task queue, the handler registry, the sync runner,
/// and the scheduler. Lifecycle is `new → initialize → use → destroy`;
/// a single owned instance is shared by reference with collaborators.
///
/// ```no_run
/// use outbox_engine::{ApplyError, EngineConfig, FileStateStore, OutboxEngine};
/// use outbox_types::{Task, TaskKind, TaskSpec};
/// use std::sync::Arc;
///
/// let store = Arc::new(FileStateStore::open("/var/lib/myapp/outbox")?);
/// let engine = OutboxEngine::new(EngineConfig::default(), store)?;
///
/// engine.register_handler(
///     "Patient",
///     Arc::new(|task: &Task| -> Result<Option<Vec<u8>>, ApplyError> {
///         // POST task.payload to the remote API here.
///         let _body = &task.payload;
///         Ok(None)
///     }),
/// );
///
/// engine.initialize(Arc::new(|| true))?;
/// engine.enqueue(TaskSpec::new(TaskKind::Create, "Patient", b"{}".to_vec()));
/// # Ok::<(), outbox_engine::EngineError>(())
/// ```
pub struct OutboxEngine {
    config: EngineConfig,
    queue: Arc<QueueStore>,
    registry: Arc<HandlerRegistry>,
    stats: SharedStats,
    checkpoint: Arc<CheckpointManager>,
    runner: Arc<SyncRunner>,
    scheduler: Mutex<Option<Scheduler>>,
    initialized: AtomicBool,
}

impl OutboxEngine {
    /// Creates an engine over the given durable state store, loading any
    /// persisted queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the state store fails while loading.
    pub fn new(config: EngineConfig, state: Arc<dyn StateStore>) -> EngineResult<Self> {
        let queue = Arc::new(QueueStore::open(
            Arc::clone(&state),
            config.queue_key(),
            config.queue_capacity,
            config.default_max_retries,
        )?);
        let registry = Arc::new(HandlerRegistry::new());
        let stats = SharedStats::new();
        let checkpoint = Arc::new(CheckpointManager::new(state, config.checkpoint_key()));
        let runner = Arc::new(SyncRunner::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            stats.clone(),
            Arc::clone(&checkpoint),
            config.batch_size,
        ));

        stats.set_pending(queue.len() as u64);

        Ok(Self {
            config,
            queue,
            registry,
            stats,
            checkpoint,
            runner,
            scheduler: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Starts the engine: performs crash recovery from the session
    /// checkpoint and spawns the periodic scheduler.
    ///
    /// Only the first call does anything; later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Currently infallible at runtime; the `Result` reserves the boundary
    /// for contract violations.
    pub fn initialize(&self, probe: Arc<dyn ConnectivityProbe>) -> EngineResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("engine already initialized, ignoring");
            return Ok(());
        }

        let now = crate::now_millis();
        let window_ms = self.config.resume_window.as_millis() as u64;
        let mut first_tick = self.config.sync_interval;

        if let Some(checkpoint) = self.checkpoint.load() {
            if checkpoint.needs_recovery(now, window_ms) {
                let adjusted = self.queue.recover_in_flight(&checkpoint.in_flight, now);
                info!(
                    in_flight = checkpoint.in_flight.len(),
                    adjusted, "recovering interrupted sync session"
                );
                first_tick = self.config.resume_delay;
            } else if checkpoint.is_stale(now, window_ms) {
                debug!("discarding stale session checkpoint");
                self.checkpoint.discard();
            }
        }

        self.checkpoint
            .save(&SessionCheckpoint::idle(now, self.queue.len() as u64));

        let scheduler = Scheduler::spawn(
            Arc::clone(&self.runner),
            Arc::clone(&self.queue),
            self.stats.clone(),
            Arc::clone(&self.checkpoint),
            probe,
            ScheduleParams {
                sync_interval: self.config.sync_interval,
                first_tick,
                checkpoint_interval: self.config.checkpoint_interval,
            },
        );
        *self.scheduler.lock() = Some(scheduler);

        info!(namespace = %self.config.namespace, pending = self.queue.len(), "engine initialized");
        Ok(())
    }

    /// Queues a change for remote application and returns its id.
    pub fn enqueue(&self, spec: TaskSpec) -> Uuid {
        let id = self.queue.enqueue(spec);
        self.stats.set_pending(self.queue.len() as u64);
        id
    }

    /// Removes a queued task. Returns whether a deletion occurred.
    pub fn remove_task(&self, id: Uuid) -> bool {
        let removed = self.queue.remove(id);
        if removed {
            self.stats.set_pending(self.queue.len() as u64);
        }
        removed
    }

    /// Returns pending tasks in processing order.
    pub fn list_pending(&self) -> Vec<Task> {
        self.queue.list()
    }

    /// Returns a snapshot of the aggregate statistics.
    pub fn get_stats(&self) -> EngineStats {
        let mut snapshot = self.stats.snapshot();
        snapshot.pending_tasks = self.queue.len() as u64;
        snapshot.pruned_tasks = self.queue.pruned_total();
        snapshot
    }

    /// Triggers a run and blocks until the batch completes.
    ///
    /// Returns the per-task outcomes, or an empty list if another run is
    /// already active or the queue is empty. The at-most-one-run rule is
    /// shared with the scheduler.
    pub fn sync_now(&self) -> Vec<SyncOutcome> {
        self.runner.run()
    }

    /// Empties the queue and persists the empty state.
    pub fn clear_queue(&self) {
        self.queue.clear();
        self.stats.set_pending(0);
    }

    /// Registers the apply handler for a resource category.
    pub fn register_handler(&self, category: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.registry.register_handler(category, handler);
    }

    /// Registers the conflict resolver for a resource category.
    pub fn register_conflict_resolver(
        &self,
        category: impl Into<String>,
        resolver: Arc<dyn ConflictResolver>,
    ) {
        self.registry.register_resolver(category, resolver);
    }

    /// Signals that connectivity was restored; triggers an immediate run
    /// attempt if the probe agrees.
    pub fn notify_connectivity_restored(&self) {
        if let Some(scheduler) = self.scheduler.lock().as_ref() {
            scheduler.wake();
        }
    }

    /// Stops scheduling future runs. An in-progress run is not aborted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before `initialize`.
    pub fn pause(&self) -> EngineResult<()> {
        match self.scheduler.lock().as_ref() {
            Some(scheduler) => {
                scheduler.pause();
                Ok(())
            }
            None => Err(EngineError::NotInitialized),
        }
    }

    /// Restarts the periodic timer after a [`pause`](Self::pause).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] before `initialize`.
    pub fn resume(&self) -> EngineResult<()> {
        match self.scheduler.lock().as_ref() {
            Some(scheduler) => {
                scheduler.resume();
                Ok(())
            }
            None => Err(EngineError::NotInitialized),
        }
    }

    /// Shuts the engine down: stops the scheduler, clears in-memory queue
    /// and stats, and removes the session checkpoint (a clean shutdown
    /// needs no recovery). The durable queue itself is left intact for
    /// the next process; use [`clear_queue`](Self::clear_queue) first to
    /// drop it explicitly.
    ///
    /// Safe to call multiple times.
    pub fn destroy(&self) {
        if let Some(scheduler) = self.scheduler.lock().take() {
            scheduler.shutdown();
        }
        self.queue.reset_in_memory();
        self.stats.clear();
        self.checkpoint.discard();
        self.initialized.store(false, Ordering::SeqCst);
        info!(namespace = %self.config.namespace, "engine destroyed");
    }
}
