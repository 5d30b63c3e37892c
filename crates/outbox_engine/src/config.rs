//! Configuration for the sync queue engine.

use std::time::Duration;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Storage namespace. Prefixes the durable keys so multiple queue
    /// instances can share one state store.
    pub namespace: String,
    /// Soft cap on the number of queued tasks. See the pruning rule on
    /// [`QueueStore`](crate::QueueStore).
    pub queue_capacity: usize,
    /// Maximum number of tasks attempted per run.
    pub batch_size: usize,
    /// Retry cap applied to tasks that don't specify their own.
    pub default_max_retries: u32,
    /// Interval between periodic sync attempts.
    pub sync_interval: Duration,
    /// How recent an interrupted-run checkpoint must be to auto-resume.
    pub resume_window: Duration,
    /// Delay before the automatic resume run after initialization.
    pub resume_delay: Duration,
    /// Cadence of idle "still alive" checkpoint writes.
    pub checkpoint_interval: Duration,
}

impl EngineConfig {
    /// Creates a configuration with the given storage namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            queue_capacity: 1000,
            batch_size: 25,
            default_max_retries: 3,
            sync_interval: Duration::from_secs(30),
            resume_window: Duration::from_secs(15 * 60),
            resume_delay: Duration::from_secs(2),
            checkpoint_interval: Duration::from_secs(60),
        }
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the default retry cap.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the crash-recovery recency window.
    pub fn with_resume_window(mut self, window: Duration) -> Self {
        self.resume_window = window;
        self
    }

    /// Sets the delay before the post-recovery resume run.
    pub fn with_resume_delay(mut self, delay: Duration) -> Self {
        self.resume_delay = delay;
        self
    }

    /// Sets the idle checkpoint cadence.
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// The durable key holding the task list.
    pub(crate) fn queue_key(&self) -> String {
        format!("{}.queue", self.namespace)
    }

    /// The durable key holding the session checkpoint.
    pub(crate) fn checkpoint_key(&self) -> String {
        format!("{}.session", self.namespace)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("outbox")
    }
}
