//! Redis queue driver
//!
//! Channel state lives under `{prefix}{channel}:*`. Operations that move an
//! id between keys are Lua scripts (see [`scripts`]); plain reads use a
//! MULTI/EXEC pipeline so the counts in a status come from one instant.

use async_trait::async_trait;
use redis::RedisResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, info};

use super::{ChannelKeys, Queue, RedisConfig, StorageError};
use crate::connection::{Pool, PooledConnection, RedisConnector};
use crate::core::{Clock, FailedJob, JobMessage, JobStatus, QueueStatus, SystemClock};
use crate::error::{QueueError, Result};
use crate::processing::WorkerKind;
use crate::serializer::JobPayload;

pub mod scripts;

use scripts::Scripts;

type RedisConnection = PooledConnection<RedisConnector>;

/// Redis-backed [`Queue`] for one channel.
pub struct RedisQueue {
    channel: String,
    keys: ChannelKeys,
    pool: Pool<RedisConnector>,
    scripts: Scripts,
    command_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisQueue {
    /// Build a pool from the config and verify Redis answers.
    pub async fn connect(config: &RedisConfig, channel: impl Into<String>) -> Result<Self> {
        let pool = Pool::new(RedisConnector::new(config)?, config.pool.clone());
        let queue = Self::with_pool(pool, config, channel);

        let conn = queue.connection().await?;
        queue.pool.release(conn);

        info!(
            "Redis queue ready for channel '{}' at {}",
            queue.channel, config.url
        );
        Ok(queue)
    }

    /// Share an existing pool, e.g. between channels of one process.
    pub fn with_pool(
        pool: Pool<RedisConnector>,
        config: &RedisConfig,
        channel: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        Self {
            keys: ChannelKeys::new(&config.key_prefix, &channel),
            channel,
            pool,
            scripts: Scripts::new(),
            command_timeout: config.command_timeout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn keys(&self) -> &ChannelKeys {
        &self.keys
    }

    pub fn pool(&self) -> &Pool<RedisConnector> {
        &self.pool
    }

    async fn connection(&self) -> Result<RedisConnection> {
        self.pool.get().await
    }

    fn score_after(&self, delay: Duration) -> i64 {
        self.clock.timestamp() + delay.as_secs() as i64
    }

    /// Settle a command outcome and decide whether the connection goes back.
    fn finish<T>(
        &self,
        operation: &str,
        conn: RedisConnection,
        outcome: std::result::Result<RedisResult<T>, Elapsed>,
    ) -> Result<T> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    conn.discard();
                }
                Err(StorageError::from_redis(operation, e).into())
            }
            Err(_) => {
                // Reply may still arrive on this connection
                conn.discard();
                Err(StorageError::timeout(self.command_timeout.as_millis() as u64).into())
            }
        }
    }
}

#[async_trait]
impl Queue for RedisQueue {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn push(&self, payload: &JobPayload, delay: Duration) -> Result<u64> {
        let body = payload.encode()?;
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .push
                .key(&self.keys.message_id)
                .key(&self.keys.messages)
                .key(&self.keys.waiting)
                .key(&self.keys.delayed)
                .arg(body)
                .arg(delay.as_secs())
                .arg(self.score_after(delay))
                .invoke_async(&mut *conn),
        )
        .await;
        let id: u64 = self.finish("push", conn, outcome)?;

        debug!("Pushed job {} onto channel '{}'", id, self.channel);
        Ok(id)
    }

    async fn pop(&self, handle_timeout: Duration) -> Result<Option<u64>> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .pop
                .key(&self.keys.waiting)
                .key(&self.keys.reserved)
                .key(&self.keys.attempts)
                .arg(self.score_after(handle_timeout))
                .invoke_async(&mut *conn),
        )
        .await;
        self.finish("pop", conn, outcome)
    }

    async fn get(&self, id: u64) -> Result<JobMessage> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::pipe()
                .atomic()
                .cmd("HGET")
                .arg(&self.keys.attempts)
                .arg(id)
                .cmd("HGET")
                .arg(&self.keys.messages)
                .arg(id)
                .query_async(&mut *conn),
        )
        .await;
        let (attempts, raw): (Option<u32>, Option<String>) = self.finish("get", conn, outcome)?;

        let raw = raw.ok_or_else(|| QueueError::invalid_job(id, "message body is missing"))?;
        Ok(JobMessage {
            id,
            attempts: attempts.unwrap_or(0),
            payload: JobPayload::decode(id, &raw)?,
        })
    }

    async fn remove(&self, id: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .remove
                .key(&self.keys.reserved)
                .key(&self.keys.attempts)
                .key(&self.keys.failed)
                .key(&self.keys.messages)
                .arg(id)
                .invoke_async(&mut *conn),
        )
        .await;
        let _: i64 = self.finish("remove", conn, outcome)?;
        Ok(())
    }

    async fn release(&self, id: u64, delay: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .release
                .key(&self.keys.delayed)
                .key(&self.keys.reserved)
                .arg(id)
                .arg(self.score_after(delay))
                .invoke_async(&mut *conn),
        )
        .await;
        let moved: i64 = self.finish("release", conn, outcome)?;
        Ok(moved == 1)
    }

    async fn failed(&self, id: u64, diagnostic: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .fail
                .key(&self.keys.failed)
                .key(&self.keys.reserved)
                .arg(id)
                .arg(diagnostic)
                .invoke_async(&mut *conn),
        )
        .await;
        let moved: i64 = self.finish("failed", conn, outcome)?;
        Ok(moved == 1)
    }

    async fn status(&self) -> Result<QueueStatus> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::pipe()
                .atomic()
                .cmd("GET")
                .arg(&self.keys.message_id)
                .cmd("LLEN")
                .arg(&self.keys.waiting)
                .cmd("HLEN")
                .arg(&self.keys.reserved)
                .cmd("ZCARD")
                .arg(&self.keys.delayed)
                .cmd("HLEN")
                .arg(&self.keys.failed)
                .query_async(&mut *conn),
        )
        .await;
        let (total, waiting, reserved, delayed, failed): (Option<u64>, u64, u64, u64, u64) =
            self.finish("status", conn, outcome)?;

        Ok(QueueStatus::from_counts(
            total.unwrap_or(0),
            waiting,
            reserved,
            delayed,
            failed,
        ))
    }

    async fn job_status(&self, id: u64) -> Result<JobStatus> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .job_status
                .key(&self.keys.failed)
                .key(&self.keys.reserved)
                .key(&self.keys.delayed)
                .key(&self.keys.messages)
                .arg(id)
                .invoke_async(&mut *conn),
        )
        .await;
        let status: String = self.finish("job_status", conn, outcome)?;

        match status.as_str() {
            "failed" => Ok(JobStatus::Failed),
            "reserved" => Ok(JobStatus::Reserved),
            "delayed" => Ok(JobStatus::Delayed),
            "waiting" => Ok(JobStatus::Waiting),
            "done" => Ok(JobStatus::Done),
            other => Err(QueueError::storage(format!(
                "unexpected job status '{}'",
                other
            ))),
        }
    }

    async fn migrate_expired(&self) -> Result<Vec<u64>> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .migrate_expired
                .key(&self.keys.delayed)
                .key(&self.keys.waiting)
                .arg(self.clock.timestamp())
                .invoke_async(&mut *conn),
        )
        .await;
        self.finish("migrate_expired", conn, outcome)
    }

    async fn retry_reserved(&self) -> Result<Vec<u64>> {
        let mut conn = self.connection().await?;
        let mut invocation = self.scripts.retry_reserved.prepare_invoke();
        invocation.key(&self.keys.reserved).key(&self.keys.delayed);
        for ready in self.keys.ready_lists() {
            invocation.key(ready);
        }
        invocation.arg(self.clock.timestamp());

        let outcome = timeout(self.command_timeout, invocation.invoke_async(&mut *conn)).await;
        let ids: Vec<u64> = self.finish("retry_reserved", conn, outcome)?;

        if !ids.is_empty() {
            info!(
                "Released {} reserved jobs on channel '{}'",
                ids.len(),
                self.channel
            );
        }
        Ok(ids)
    }

    async fn get_failed(&self) -> Result<Vec<FailedJob>> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::cmd("HGETALL")
                .arg(&self.keys.failed)
                .query_async(&mut *conn),
        )
        .await;
        let entries: HashMap<u64, String> = self.finish("get_failed", conn, outcome)?;

        let mut failed: Vec<FailedJob> = entries
            .into_iter()
            .map(|(id, payload)| FailedJob { id, payload })
            .collect();
        failed.sort_by_key(|job| job.id);
        Ok(failed)
    }

    async fn clear_failed(&self, id: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .clear_failed
                .key(&self.keys.failed)
                .key(&self.keys.attempts)
                .key(&self.keys.messages)
                .arg(id)
                .invoke_async(&mut *conn),
        )
        .await;
        let _: i64 = self.finish("clear_failed", conn, outcome)?;
        Ok(())
    }

    async fn reload_failed(&self, id: u64, delay: Duration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            self.scripts
                .release
                .key(&self.keys.delayed)
                .key(&self.keys.failed)
                .arg(id)
                .arg(self.score_after(delay))
                .invoke_async(&mut *conn),
        )
        .await;
        let moved: i64 = self.finish("reload_failed", conn, outcome)?;
        Ok(moved == 1)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::cmd("DEL").arg(self.keys.all()).query_async(&mut *conn),
        )
        .await;
        let deleted: i64 = self.finish("clear", conn, outcome)?;

        info!("Cleared channel '{}' ({} keys)", self.channel, deleted);
        Ok(())
    }

    async fn push_ready(&self, id: u64, kind: WorkerKind) -> Result<()> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::cmd("LPUSH")
                .arg(self.keys.ready(kind))
                .arg(id)
                .query_async(&mut *conn),
        )
        .await;
        let _: i64 = self.finish("push_ready", conn, outcome)?;
        Ok(())
    }

    async fn return_ready(&self, id: u64, kind: WorkerKind) -> Result<()> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::cmd("RPUSH")
                .arg(self.keys.ready(kind))
                .arg(id)
                .query_async(&mut *conn),
        )
        .await;
        let _: i64 = self.finish("return_ready", conn, outcome)?;
        Ok(())
    }

    async fn pop_ready(&self, kind: WorkerKind) -> Result<Option<u64>> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::cmd("RPOP")
                .arg(self.keys.ready(kind))
                .query_async(&mut *conn),
        )
        .await;
        self.finish("pop_ready", conn, outcome)
    }

    async fn ready_len(&self, kind: WorkerKind) -> Result<u64> {
        let mut conn = self.connection().await?;
        let outcome = timeout(
            self.command_timeout,
            redis::cmd("LLEN")
                .arg(self.keys.ready(kind))
                .query_async(&mut *conn),
        )
        .await;
        self.finish("ready_len", conn, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureDiagnostic, ManualClock};

    fn test_redis_config() -> RedisConfig {
        RedisConfig::new()
            .with_url(
                std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            )
            .with_key_prefix("aint-queue-test:")
            .with_connection_timeout(Duration::from_millis(500))
    }

    async fn create_test_queue(channel: &str) -> Option<(RedisQueue, ManualClock)> {
        // Redis not available means the test is skipped
        let queue = RedisQueue::connect(&test_redis_config(), channel).await.ok()?;
        let clock = ManualClock::starting_now();
        let queue = queue.with_clock(Arc::new(clock.clone()));
        queue.clear().await.ok()?;
        Some((queue, clock))
    }

    fn payload(name: &str) -> JobPayload {
        JobPayload::callable(name, &serde_json::json!({"n": 1})).unwrap()
    }

    #[tokio::test]
    async fn test_redis_pop_release_fail_cycle() {
        let (queue, clock) = match create_test_queue("unit-cycle").await {
            Some(queue) => queue,
            None => {
                println!("Skipping Redis test - Redis not available");
                return;
            }
        };

        let id = queue.push(&payload("a"), Duration::ZERO).await.unwrap();
        assert_eq!(queue.pop(Duration::from_secs(30)).await.unwrap(), Some(id));
        assert_eq!(queue.job_status(id).await.unwrap(), JobStatus::Reserved);

        assert!(queue.release(id, Duration::from_secs(10)).await.unwrap());
        assert!(!queue.release(id, Duration::ZERO).await.unwrap());
        assert_eq!(queue.job_status(id).await.unwrap(), JobStatus::Delayed);

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(queue.migrate_expired().await.unwrap(), vec![id]);
        assert_eq!(queue.pop(Duration::from_secs(30)).await.unwrap(), Some(id));
        assert_eq!(queue.get(id).await.unwrap().attempts, 2);

        let diagnostic = FailureDiagnostic::new("JobError", "boom", 2).to_json().unwrap();
        assert!(queue.failed(id, &diagnostic).await.unwrap());

        let failed = queue.get_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].diagnostic().unwrap().attempts, 2);

        queue.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_migrate_chunks_large_batches() {
        let (queue, clock) = match create_test_queue("unit-chunks").await {
            Some(queue) => queue,
            None => {
                println!("Skipping Redis test - Redis not available");
                return;
            }
        };

        for _ in 0..250 {
            queue.push(&payload("bulk"), Duration::from_secs(1)).await.unwrap();
        }
        clock.advance(chrono::Duration::seconds(1));

        let migrated = queue.migrate_expired().await.unwrap();
        assert_eq!(migrated.len(), 250);

        let status = queue.status().await.unwrap();
        assert_eq!(status.waiting, 250);
        assert_eq!(status.delayed, 0);

        queue.clear().await.unwrap();
    }
}
