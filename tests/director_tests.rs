mod common;

use aint_queue::processing::{WorkerKind, WorkerStrategy, WorkersConfig};
use aint_queue::{JobCapability, JobMessage, JobPayload, MemoryQueue, QueueError, WorkerDirector};
use common::RecordingStrategy;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn message(id: u64, name: &str) -> JobMessage {
    JobMessage {
        id,
        attempts: 1,
        payload: JobPayload::callable(name, &serde_json::json!(null)).unwrap(),
    }
}

#[tokio::test]
async fn test_routes_by_capability() {
    let process = RecordingStrategy::new(WorkerKind::Process);
    let pool = RecordingStrategy::new(WorkerKind::ProcessPool);
    let coroutine = RecordingStrategy::new(WorkerKind::Coroutine);
    let director = WorkerDirector::new()
        .with_strategy(process.clone())
        .with_strategy(pool.clone())
        .with_strategy(coroutine.clone());
    let registry = common::registry();

    for (id, name) in [(1, "sync_job"), (2, "pool_job"), (3, "light_job"), (4, "light_job")] {
        let job = registry.resolve(&message(id, name)).unwrap();
        director.dispatch(id, job.as_ref()).await.unwrap();
    }

    assert_eq!(process.received(), vec![1]);
    assert_eq!(pool.received(), vec![2]);
    assert_eq!(coroutine.received(), vec![3, 4]);
}

#[tokio::test]
async fn test_disabled_strategy_falls_back_to_process() {
    let process = RecordingStrategy::new(WorkerKind::Process);
    let director = WorkerDirector::new().with_strategy(process.clone());

    assert_eq!(director.route(JobCapability::CoroutineSafe).unwrap(), WorkerKind::Process);
    assert_eq!(director.route(JobCapability::AsyncProcess).unwrap(), WorkerKind::Process);

    let job = common::registry().resolve(&message(9, "light_job")).unwrap();
    assert_eq!(director.dispatch(9, job.as_ref()).await.unwrap(), WorkerKind::Process);
    assert_eq!(process.received(), vec![9]);
}

#[test]
fn test_no_route_without_process_strategy() {
    let director = WorkerDirector::new().with_strategy(RecordingStrategy::new(WorkerKind::Coroutine));

    assert_eq!(director.route(JobCapability::CoroutineSafe).unwrap(), WorkerKind::Coroutine);
    let err = director.route(JobCapability::Sync).unwrap_err();
    assert!(matches!(err, QueueError::Configuration { .. }));
}

#[tokio::test]
async fn test_lifecycle_reaches_every_strategy() {
    let process = RecordingStrategy::new(WorkerKind::Process);
    let coroutine = RecordingStrategy::new(WorkerKind::Coroutine);
    let director = WorkerDirector::new()
        .with_strategy(process.clone())
        .with_strategy(coroutine.clone());

    let pids = director.start().await.unwrap();
    assert_eq!(pids.len(), 2);
    assert!(director.is_running());

    director.rebalance().await.unwrap();
    director.wait().await.unwrap();
    assert!(!director.is_running());

    director.start().await.unwrap();
    director.stop().await.unwrap();

    for strategy in [&process, &coroutine] {
        assert_eq!(strategy.starts.load(Ordering::SeqCst), 2);
        assert_eq!(strategy.waits.load(Ordering::SeqCst), 1);
        assert_eq!(strategy.stops.load(Ordering::SeqCst), 1);
        assert_eq!(strategy.rebalances.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_with_strategy_replaces_same_kind() {
    let first = RecordingStrategy::new(WorkerKind::Process);
    let second = RecordingStrategy::new(WorkerKind::Process);
    let director = WorkerDirector::new().with_strategy(first).with_strategy(second.clone());

    assert_eq!(director.kinds(), vec![WorkerKind::Process]);
    let kept = director.strategy(WorkerKind::Process).unwrap();
    assert!(Arc::ptr_eq(kept, &(second as Arc<dyn WorkerStrategy>)));
}

#[test]
fn test_from_config_builds_enabled_strategies() {
    let queue = Arc::new(MemoryQueue::new("director"));
    let mut config = WorkersConfig::default();
    config.coroutine.enabled = true;

    let director = WorkerDirector::from_config(queue.clone(), &config).unwrap();
    assert_eq!(director.kinds(), vec![WorkerKind::Process, WorkerKind::Coroutine]);

    config.process.enabled = false;
    config.coroutine.enabled = false;
    let err = WorkerDirector::from_config(queue, &config).unwrap_err();
    assert!(matches!(err, QueueError::Configuration { .. }));
}
