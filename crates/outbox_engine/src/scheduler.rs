//! Periodic and event-driven run scheduling.

use crate::checkpoint::CheckpointManager;
use crate::runner::SyncRunner;
use crate::stats::SharedStats;
use crate::store::QueueStore;
use outbox_types::SessionCheckpoint;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reports whether the remote is currently reachable.
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if a sync attempt is worth making.
    fn is_online(&self) -> bool;
}

impl<F> ConnectivityProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_online(&self) -> bool {
        self()
    }
}

/// Control messages consumed by the scheduler loop.
enum Control {
    /// Connectivity restored (or manual nudge): run now if online.
    Wake,
    /// Stop scheduling future runs; in-progress runs are unaffected.
    Pause,
    /// Restart the periodic timer.
    Resume,
    /// Exit the loop.
    Shutdown,
}

/// Timing knobs for the scheduler loop.
#[derive(Debug, Clone)]
pub(crate) struct ScheduleParams {
    /// Interval between periodic sync attempts.
    pub sync_interval: Duration,
    /// Delay before the first tick (the post-recovery resume run).
    pub first_tick: Duration,
    /// Cadence of idle checkpoint refreshes.
    pub checkpoint_interval: Duration,
}

/// Drives the sync runner from a dedicated thread.
///
/// The loop triggers a run on each periodic tick while the probe reports
/// online and the queue is non-empty, and immediately on a wake signal.
/// All signals arrive over a channel, so there is no shared timer state
/// to lock.
pub(crate) struct Scheduler {
    tx: Sender<Control>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawns the scheduler thread.
    pub(crate) fn spawn(
        runner: Arc<SyncRunner>,
        queue: Arc<QueueStore>,
        stats: SharedStats,
        checkpoint: Arc<CheckpointManager>,
        probe: Arc<dyn ConnectivityProbe>,
        params: ScheduleParams,
    ) -> Self {
        let (tx, rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("outbox-scheduler".into())
            .spawn(move || {
                let mut paused = false;
                let mut deadline = Instant::now() + params.first_tick;
                let mut last_checkpoint = Instant::now();

                stats.set_next_run(crate::now_millis() + params.first_tick.as_millis() as u64);

                loop {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(timeout) {
                        Ok(Control::Wake) => {
                            if !paused && probe.is_online() {
                                debug!("wake signal, running now");
                                runner.run();
                                deadline = Instant::now() + params.sync_interval;
                                stats.set_next_run(
                                    crate::now_millis() + params.sync_interval.as_millis() as u64,
                                );
                            }
                        }
                        Ok(Control::Pause) => {
                            info!("scheduler paused");
                            paused = true;
                        }
                        Ok(Control::Resume) => {
                            info!("scheduler resumed");
                            paused = false;
                            deadline = Instant::now() + params.sync_interval;
                            stats.set_next_run(
                                crate::now_millis() + params.sync_interval.as_millis() as u64,
                            );
                        }
                        Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("scheduler shutting down");
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if !paused && probe.is_online() && !queue.is_empty() {
                                runner.run();
                                last_checkpoint = Instant::now();
                            } else if last_checkpoint.elapsed() >= params.checkpoint_interval {
                                // Idle heartbeat so a later crash is
                                // distinguishable from a stale session.
                                checkpoint.save(&SessionCheckpoint::idle(
                                    crate::now_millis(),
                                    queue.len() as u64,
                                ));
                                last_checkpoint = Instant::now();
                            }
                            deadline = Instant::now() + params.sync_interval;
                            stats.set_next_run(
                                crate::now_millis() + params.sync_interval.as_millis() as u64,
                            );
                        }
                    }
                }
            });

        match handle {
            Ok(handle) => Self {
                tx,
                handle: Some(handle),
            },
            Err(e) => {
                warn!(error = %e, "failed to spawn scheduler thread");
                Self { tx, handle: None }
            }
        }
    }

    /// Requests an immediate run attempt.
    pub(crate) fn wake(&self) {
        let _ = self.tx.send(Control::Wake);
    }

    /// Stops scheduling future runs.
    pub(crate) fn pause(&self) {
        let _ = self.tx.send(Control::Pause);
    }

    /// Restarts the periodic timer.
    pub(crate) fn resume(&self) {
        let _ = self.tx.send(Control::Resume);
    }

    /// Stops the loop and joins the thread.
    pub(crate) fn shutdown(mut self) {
        let _ = self.tx.send(Control::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let _ = self.tx.send(Control::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
