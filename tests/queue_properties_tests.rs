use aint_queue::core::ManualClock;
use aint_queue::processing::{ElasticConfig, ExecutionOutcome, RetryPolicy, RetryStrategy};
use aint_queue::serializer::NamedJob;
use aint_queue::{
    Job, JobContext, JobError, JobExecutor, JobPayload, JobRegistry, JobStatus, MemoryQueue,
    PayloadKind, Queue,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const HANDLE_TIMEOUT: Duration = Duration::from_secs(60);

fn clocked_queue(channel: &str) -> (MemoryQueue, ManualClock) {
    let clock = ManualClock::starting_now();
    (MemoryQueue::with_clock(channel, Arc::new(clock.clone())), clock)
}

fn payload() -> JobPayload {
    JobPayload::callable("noop", &serde_json::json!({})).unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Flaky {
    name: String,
}

#[async_trait]
impl Job for Flaky {
    async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Err(JobError::new("NetworkError", format!("{} unreachable", self.name)))
    }

    fn can_retry(&self, attempts: u32, error: &JobError) -> bool {
        policy().can_retry(attempts, error)
    }

    fn retry_after(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        policy().retry_after(attempts, now)
    }
}

impl NamedJob for Flaky {
    const NAME: &'static str = "flaky";
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(RetryStrategy::fixed(chrono::Duration::seconds(10), 3))
}

#[tokio::test]
async fn test_scenario_a_push_pop_remove() {
    let queue = MemoryQueue::new("scenario-a");

    let id = queue.push(&payload(), Duration::ZERO).await.unwrap();
    let status = queue.status().await.unwrap();
    assert_eq!((status.waiting, status.total), (1, 1));

    assert_eq!(queue.pop(HANDLE_TIMEOUT).await.unwrap(), Some(id));
    let status = queue.status().await.unwrap();
    assert_eq!((status.reserved, status.waiting), (1, 0));

    queue.remove(id).await.unwrap();
    let status = queue.status().await.unwrap();
    assert_eq!(status.done, 1);
    assert_eq!(status.pending(), 0);
}

#[tokio::test]
async fn test_scenario_b_delay_then_migrate() {
    let (queue, clock) = clocked_queue("scenario-b");

    queue.push(&payload(), Duration::from_secs(5)).await.unwrap();
    assert_eq!(queue.status().await.unwrap().delayed, 1);

    clock.advance(chrono::Duration::seconds(5));
    let migrated = queue.migrate_expired().await.unwrap();

    assert_eq!(migrated.len(), 1);
    let status = queue.status().await.unwrap();
    assert_eq!((status.waiting, status.delayed), (1, 0));
}

#[tokio::test]
async fn test_scenario_c_crash_recovery() {
    let queue = MemoryQueue::new("scenario-c");
    let id = queue.push(&payload(), Duration::ZERO).await.unwrap();
    queue.pop(HANDLE_TIMEOUT).await.unwrap();
    // Worker dies here without remove or release

    // A fresh listener attaches to the same channel
    let restarted = queue.clone();
    assert_eq!(restarted.retry_reserved().await.unwrap(), vec![id]);
    assert_eq!(restarted.job_status(id).await.unwrap(), JobStatus::Delayed);

    restarted.migrate_expired().await.unwrap();
    assert_eq!(restarted.pop(HANDLE_TIMEOUT).await.unwrap(), Some(id));
    assert_eq!(restarted.get(id).await.unwrap().attempts, 2);
}

#[test]
fn test_scenario_d_elastic_sizing() {
    let elastic = ElasticConfig::new(2, 10, 5);
    assert_eq!(elastic.desired(37), 8);
}

#[tokio::test]
async fn test_round_trip_for_every_payload_kind() {
    let queue = MemoryQueue::new("round-trip");
    let job = Flaky {
        name: "x".repeat(4096),
    };
    let payloads = [
        JobPayload::callable("send", &serde_json::json!(["a@b.c", 3])).unwrap(),
        JobPayload::object(&job).unwrap(),
        JobPayload::compressed(&job, 1024).unwrap(),
    ];

    for original in payloads {
        let id = queue.push(&original, Duration::ZERO).await.unwrap();
        let popped = queue.pop(HANDLE_TIMEOUT).await.unwrap().unwrap();
        let message = queue.get(popped).await.unwrap();

        assert_eq!(popped, id);
        assert_eq!(message.payload, original);
    }

    let mut registry = JobRegistry::new();
    registry.register::<Flaky>();
    let compressed = JobPayload::compressed(&job, 1024).unwrap();
    assert_eq!(compressed.kind, PayloadKind::CompressedObject);
    let id = queue.push(&compressed, Duration::ZERO).await.unwrap();
    queue.pop(HANDLE_TIMEOUT).await.unwrap();
    assert!(registry.resolve(&queue.get(id).await.unwrap()).is_ok());
}

#[tokio::test]
async fn test_delay_is_invisible_until_due() {
    let (queue, clock) = clocked_queue("delay");
    queue.push(&payload(), Duration::from_secs(30)).await.unwrap();

    clock.advance(chrono::Duration::seconds(29));
    assert!(queue.migrate_expired().await.unwrap().is_empty());
    assert_eq!(queue.status().await.unwrap().waiting, 0);
    assert_eq!(queue.pop(HANDLE_TIMEOUT).await.unwrap(), None);

    clock.advance(chrono::Duration::seconds(1));
    assert_eq!(queue.migrate_expired().await.unwrap().len(), 1);
    assert_eq!(queue.status().await.unwrap().waiting, 1);
}

#[tokio::test]
async fn test_retry_backoff_then_dead_letter() {
    let (queue, clock) = clocked_queue("backoff");
    let mut registry = JobRegistry::new();
    registry.register::<Flaky>();
    let executor = JobExecutor::new(Arc::new(queue.clone()), Arc::new(registry))
        .with_clock(Arc::new(clock.clone()));

    let payload = JobPayload::object(&Flaky { name: "api".into() }).unwrap();
    let id = queue.push(&payload, Duration::ZERO).await.unwrap();

    for attempt in 1..=2 {
        assert_eq!(queue.pop(HANDLE_TIMEOUT).await.unwrap(), Some(id));
        let outcome = executor.execute(id).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Retrying { delay, .. } if delay == Duration::from_secs(10)));

        clock.advance(chrono::Duration::seconds(9));
        queue.migrate_expired().await.unwrap();
        assert_eq!(queue.status().await.unwrap().waiting, 0, "attempt {}", attempt);

        clock.advance(chrono::Duration::seconds(1));
        queue.migrate_expired().await.unwrap();
        assert_eq!(queue.status().await.unwrap().waiting, 1, "attempt {}", attempt);
    }

    queue.pop(HANDLE_TIMEOUT).await.unwrap();
    let outcome = executor.execute(id).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));

    let status = queue.status().await.unwrap();
    assert_eq!((status.failed, status.delayed), (1, 0));
    let diagnostic = queue.get_failed().await.unwrap()[0].diagnostic().unwrap();
    assert_eq!(diagnostic.attempts, 3);
    assert_eq!(diagnostic.last_error, "NetworkError");
}

#[tokio::test]
async fn test_remove_and_clear_failed_are_idempotent() {
    let queue = MemoryQueue::new("idempotent");
    let done = queue.push(&payload(), Duration::ZERO).await.unwrap();
    let dead = queue.push(&payload(), Duration::ZERO).await.unwrap();
    queue.pop(HANDLE_TIMEOUT).await.unwrap();
    queue.pop(HANDLE_TIMEOUT).await.unwrap();
    queue.failed(dead, "{}").await.unwrap();

    queue.remove(done).await.unwrap();
    queue.clear_failed(dead).await.unwrap();
    let once = queue.status().await.unwrap();

    queue.remove(done).await.unwrap();
    queue.clear_failed(dead).await.unwrap();
    assert_eq!(queue.status().await.unwrap(), once);
    assert_eq!(once.done, 2);
}

#[tokio::test]
async fn test_reload_failed_requeues_dead_letter() {
    let (queue, clock) = clocked_queue("reload");
    let id = queue.push(&payload(), Duration::ZERO).await.unwrap();
    queue.pop(HANDLE_TIMEOUT).await.unwrap();
    queue.failed(id, r#"{"last_error":"X","last_error_message":"y","attempts":1}"#)
        .await
        .unwrap();

    assert!(queue.reload_failed(id, Duration::from_secs(3)).await.unwrap());
    assert!(!queue.reload_failed(id, Duration::ZERO).await.unwrap());
    assert_eq!(queue.job_status(id).await.unwrap(), JobStatus::Delayed);

    clock.advance(chrono::Duration::seconds(3));
    queue.migrate_expired().await.unwrap();
    assert_eq!(queue.pop(HANDLE_TIMEOUT).await.unwrap(), Some(id));
}

#[tokio::test]
async fn test_concurrent_pollers_never_share_an_id() {
    let queue = Arc::new(MemoryQueue::new("concurrent"));
    for _ in 0..200 {
        queue.push(&payload(), Duration::ZERO).await.unwrap();
    }

    let pollers = (0..8).map(|_| {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            let mut mine = Vec::new();
            while let Some(id) = queue.pop(HANDLE_TIMEOUT).await.unwrap() {
                mine.push(id);
                tokio::task::yield_now().await;
            }
            mine
        })
    });

    let mut seen = HashSet::new();
    let mut count = 0;
    for ids in join_all(pollers).await {
        for id in ids.unwrap() {
            count += 1;
            assert!(seen.insert(id), "id {} popped twice", id);
        }
    }
    assert_eq!(count, 200);
}
