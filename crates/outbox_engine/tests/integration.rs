//! End-to-end tests for the outbox engine.

use outbox_engine::{
    ApplyError, CheckpointManager, EngineConfig, FileStateStore, MemoryStateStore, OutboxEngine,
    ResolveError, StateStore,
};
use outbox_types::{ConflictPolicy, SessionCheckpoint, Task, TaskKind, TaskPriority, TaskSpec};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

fn memory_engine() -> (OutboxEngine, Arc<MemoryStateStore>) {
    let state = Arc::new(MemoryStateStore::new());
    let engine = OutboxEngine::new(
        EngineConfig::new("test"),
        Arc::clone(&state) as Arc<dyn StateStore>,
    )
    .unwrap();
    (engine, state)
}

fn ok_handler() -> Arc<dyn outbox_engine::TaskHandler> {
    Arc::new(|_: &Task| -> Result<Option<Vec<u8>>, ApplyError> { Ok(None) })
}

fn failing_handler(message: &'static str) -> Arc<dyn outbox_engine::TaskHandler> {
    Arc::new(move |_: &Task| -> Result<Option<Vec<u8>>, ApplyError> {
        Err(ApplyError::failed(message))
    })
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn pending_tasks_are_priority_then_fifo_ordered() {
    let (engine, _) = memory_engine();

    let low = engine.enqueue(
        TaskSpec::new(TaskKind::Create, "Observation", vec![]).with_priority(TaskPriority::Low),
    );
    let critical = engine.enqueue(
        TaskSpec::new(TaskKind::Update, "Patient", vec![]).with_priority(TaskPriority::Critical),
    );
    let normal = engine.enqueue(TaskSpec::new(TaskKind::Delete, "Encounter", vec![]));

    let ids: Vec<_> = engine.list_pending().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![critical, normal, low]);
}

#[test]
fn concurrent_sync_now_yields_one_real_run() {
    let (engine, _) = memory_engine();
    let engine = Arc::new(engine);

    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let entered_h = Arc::clone(&entered);
    let release_h = Arc::clone(&release);
    engine.register_handler(
        "Patient",
        Arc::new(move |_: &Task| -> Result<Option<Vec<u8>>, ApplyError> {
            entered_h.wait();
            release_h.wait();
            Ok(None)
        }),
    );

    engine.enqueue(TaskSpec::new(TaskKind::Create, "Patient", vec![]));

    let background = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.sync_now())
    };

    entered.wait();
    let second = engine.sync_now();
    assert!(second.is_empty());

    release.wait();
    let first = background.join().unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].succeeded);
}

#[test]
fn retry_cap_drops_task_after_exact_attempts() {
    let (engine, _) = memory_engine();
    engine.register_handler("Patient", failing_handler("remote unavailable"));

    engine.enqueue(TaskSpec::new(TaskKind::Create, "Patient", vec![]).with_max_retries(2));

    engine.sync_now();
    assert_eq!(engine.list_pending().len(), 1);
    assert_eq!(engine.get_stats().failed_tasks, 0);

    engine.sync_now();
    assert!(engine.list_pending().is_empty());
    assert_eq!(engine.get_stats().failed_tasks, 1);

    // Never duplicated into the failure count.
    engine.sync_now();
    assert_eq!(engine.get_stats().failed_tasks, 1);
}

#[test]
fn conflict_merge_round_trip() {
    let (engine, _) = memory_engine();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    engine.register_handler(
        "Patient",
        Arc::new(move |task: &Task| -> Result<Option<Vec<u8>>, ApplyError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApplyError::conflict(b"server-v2".to_vec()))
            } else {
                Ok(Some(task.payload.clone()))
            }
        }),
    );
    engine.register_conflict_resolver(
        "Patient",
        Arc::new(
            |task: &Task, server: Option<&[u8]>| -> Result<Vec<u8>, ResolveError> {
                let mut merged = task.payload.clone();
                merged.push(b'+');
                merged.extend_from_slice(server.unwrap_or_default());
                Ok(merged)
            },
        ),
    );

    engine.enqueue(
        TaskSpec::new(TaskKind::Update, "Patient", b"local-v1".to_vec())
            .with_conflict_policy(ConflictPolicy::Merge),
    );

    let outcomes = engine.sync_now();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].succeeded);
    assert!(outcomes[0].conflict_detected);
    assert_eq!(
        outcomes[0].remote_version.as_deref(),
        Some(b"local-v1+server-v2".as_slice())
    );
    assert!(engine.list_pending().is_empty());

    let stats = engine.get_stats();
    assert_eq!(stats.completed_tasks, 1);
    assert_eq!(stats.conflicts_resolved, 1);
    // The resolution retry consumed no retry budget and no failure count.
    assert_eq!(stats.failed_tasks, 0);
}

#[test]
fn manual_conflict_stays_visibly_pending() {
    let (engine, _) = memory_engine();
    engine.register_handler(
        "Patient",
        Arc::new(|_: &Task| -> Result<Option<Vec<u8>>, ApplyError> {
            Err(ApplyError::conflict(b"server".to_vec()))
        }),
    );

    let id = engine.enqueue(
        TaskSpec::new(TaskKind::Update, "Patient", vec![1])
            .with_conflict_policy(ConflictPolicy::Manual),
    );

    let outcomes = engine.sync_now();
    assert!(!outcomes[0].succeeded);
    assert!(outcomes[0].conflict_detected);
    assert_eq!(outcomes[0].remote_version.as_deref(), Some(b"server".as_slice()));

    // Left queued for external handling, retry budget untouched.
    let pending = engine.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].retry_count, 0);
}

#[test]
fn unhandled_category_is_terminal() {
    let (engine, _) = memory_engine();
    engine.enqueue(TaskSpec::new(TaskKind::Create, "Patient", vec![]));

    let outcomes = engine.sync_now();
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].succeeded);
    assert!(engine.list_pending().is_empty());
    assert_eq!(engine.get_stats().failed_tasks, 1);
}

#[test]
fn queue_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();

    let ids: Vec<_> = {
        let state = Arc::new(FileStateStore::open(dir.path()).unwrap());
        let engine =
            OutboxEngine::new(EngineConfig::new("clinic"), state as Arc<dyn StateStore>).unwrap();
        (0..10)
            .map(|i| {
                let priority = if i % 2 == 0 {
                    TaskPriority::Normal
                } else {
                    TaskPriority::High
                };
                engine.enqueue(
                    TaskSpec::new(TaskKind::Create, "Patient", vec![i]).with_priority(priority),
                )
            })
            .collect()
    };

    // Fresh process: only the persisted files remain.
    let state = Arc::new(FileStateStore::open(dir.path()).unwrap());
    let engine =
        OutboxEngine::new(EngineConfig::new("clinic"), state as Arc<dyn StateStore>).unwrap();

    let pending = engine.list_pending();
    assert_eq!(pending.len(), 10);
    for task in &pending {
        assert!(ids.contains(&task.id));
    }
    // High before normal, FIFO within each band.
    assert!(pending[..5].iter().all(|t| t.priority == TaskPriority::High));
    assert!(pending[5..].iter().all(|t| t.priority == TaskPriority::Normal));
}

#[test]
fn interrupted_run_is_compensated_on_restart() {
    let state = Arc::new(MemoryStateStore::new());
    let config = EngineConfig::new("test");

    // First process: one failed attempt leaves retry_count at 1.
    let id = {
        let engine = OutboxEngine::new(
            config.clone(),
            Arc::clone(&state) as Arc<dyn StateStore>,
        )
        .unwrap();
        engine.register_handler("Patient", failing_handler("cut off"));
        let id = engine.enqueue(TaskSpec::new(TaskKind::Update, "Patient", vec![1]));
        engine.sync_now();
        assert_eq!(engine.list_pending()[0].retry_count, 1);
        id
    };

    // Simulate dying mid-apply: the checkpoint says the task was in flight.
    let manager = CheckpointManager::new(
        Arc::clone(&state) as Arc<dyn StateStore>,
        "test.session",
    );
    manager.save(&SessionCheckpoint::processing(now_millis(), vec![id], 1));

    // Second process: recovery gives the attempt back.
    let engine =
        OutboxEngine::new(config, Arc::clone(&state) as Arc<dyn StateStore>).unwrap();
    engine.initialize(Arc::new(|| false)).unwrap();

    let pending = engine.list_pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 0);

    engine.destroy();
}

#[test]
fn stale_checkpoint_is_discarded() {
    let state = Arc::new(MemoryStateStore::new());
    let config = EngineConfig::new("test").with_resume_window(Duration::from_secs(1));

    let id = {
        let engine = OutboxEngine::new(
            config.clone(),
            Arc::clone(&state) as Arc<dyn StateStore>,
        )
        .unwrap();
        engine.register_handler("Patient", failing_handler("cut off"));
        let id = engine.enqueue(TaskSpec::new(TaskKind::Update, "Patient", vec![1]));
        engine.sync_now();
        id
    };

    let manager = CheckpointManager::new(
        Arc::clone(&state) as Arc<dyn StateStore>,
        "test.session",
    );
    manager.save(&SessionCheckpoint::processing(
        now_millis().saturating_sub(10_000),
        vec![id],
        1,
    ));

    let engine = OutboxEngine::new(config, Arc::clone(&state) as Arc<dyn StateStore>).unwrap();
    engine.initialize(Arc::new(|| false)).unwrap();

    // Too old to trust: no compensation applied.
    assert_eq!(engine.list_pending()[0].retry_count, 1);

    engine.destroy();
}

#[test]
fn scheduler_drains_queue_when_online() {
    let state = Arc::new(MemoryStateStore::new());
    let config = EngineConfig::new("test")
        .with_sync_interval(Duration::from_millis(20))
        .with_resume_delay(Duration::from_millis(20));
    let engine =
        OutboxEngine::new(config, Arc::clone(&state) as Arc<dyn StateStore>).unwrap();
    engine.register_handler("Patient", ok_handler());
    engine.initialize(Arc::new(|| true)).unwrap();

    engine.enqueue(TaskSpec::new(TaskKind::Create, "Patient", vec![]));
    engine.enqueue(TaskSpec::new(TaskKind::Update, "Patient", vec![]));

    assert!(wait_until(Duration::from_secs(5), || engine
        .list_pending()
        .is_empty()));
    assert_eq!(engine.get_stats().completed_tasks, 2);
    assert!(engine.get_stats().last_run_ms.is_some());

    engine.destroy();
}

#[test]
fn connectivity_restored_triggers_immediate_run() {
    let state = Arc::new(MemoryStateStore::new());
    let online = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let probe_flag = Arc::clone(&online);

    let config = EngineConfig::new("test").with_sync_interval(Duration::from_secs(300));
    let engine =
        OutboxEngine::new(config, Arc::clone(&state) as Arc<dyn StateStore>).unwrap();
    engine.register_handler("Patient", ok_handler());
    engine
        .initialize(Arc::new(move || probe_flag.load(Ordering::SeqCst)))
        .unwrap();

    engine.enqueue(TaskSpec::new(TaskKind::Create, "Patient", vec![]));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.list_pending().len(), 1);

    online.store(true, Ordering::SeqCst);
    engine.notify_connectivity_restored();

    assert!(wait_until(Duration::from_secs(5), || engine
        .list_pending()
        .is_empty()));

    engine.destroy();
}

#[test]
fn persistence_failure_does_not_break_the_api() {
    let (engine, state) = memory_engine();
    engine.register_handler("Patient", ok_handler());

    state.set_fail_writes(true);
    let id = engine.enqueue(TaskSpec::new(TaskKind::Create, "Patient", vec![1]));

    // The queue stays authoritative in memory and the run still works.
    assert_eq!(engine.list_pending().len(), 1);
    let outcomes = engine.sync_now();
    assert!(outcomes[0].succeeded);
    assert_eq!(outcomes[0].task_id, id);
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
