//! Queue backends
//!
//! A [`Queue`] owns all durable state of one channel: the waiting list, the
//! delayed set, the reservation set, attempt counters, message bodies and
//! the failed set. Every operation that moves an id between sets is atomic,
//! so concurrent pollers never reserve the same id twice.
//!
//! - **[`MemoryQueue`]**: in-process backend for tests and single-process use
//! - **[`RedisQueue`]**: Redis backend whose multi-set operations run as Lua scripts
//!
//! ## Example
//!
//! ```rust
//! use aint_queue::{JobPayload, MemoryQueue, Queue};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let queue = MemoryQueue::new("mail");
//! let payload = JobPayload::callable("send", &serde_json::json!(["a@b.c"])).unwrap();
//!
//! let id = queue.push(&payload, Duration::ZERO).await.unwrap();
//! assert_eq!(queue.pop(Duration::from_secs(60)).await.unwrap(), Some(id));
//!
//! let message = queue.get(id).await.unwrap();
//! assert_eq!(message.attempts, 1);
//! assert_eq!(message.payload, payload);
//!
//! queue.remove(id).await.unwrap();
//! assert_eq!(queue.status().await.unwrap().done, 1);
//! # });
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::core::{FailedJob, JobMessage, JobStatus, QueueStatus};
use crate::error::Result;
use crate::processing::WorkerKind;
use crate::serializer::JobPayload;

pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod settings;

pub use config::{DEFAULT_KEY_PREFIX, RedisConfig};
pub use error::StorageError;
pub use keys::ChannelKeys;
pub use memory::MemoryQueue;
#[cfg(feature = "redis")]
pub use redis::RedisQueue;
pub use settings::Settings;

/// Durable job state for one channel.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Channel this queue is scoped to.
    fn channel(&self) -> &str;

    /// Store a payload and make it visible now (`delay` zero) or after `delay`.
    ///
    /// The body is written before the id lands on the waiting list or the
    /// delayed set, so a popper never sees an id without a body.
    async fn push(&self, payload: &JobPayload, delay: Duration) -> Result<u64>;

    /// Reserve the oldest waiting id, or `None` when nothing is waiting.
    ///
    /// Bumps the attempt counter and records `now + handle_timeout` as the
    /// reservation expiry.
    async fn pop(&self, handle_timeout: Duration) -> Result<Option<u64>>;

    /// Body and attempt count of a job. A missing or malformed body is
    /// [`QueueError::InvalidJob`](crate::QueueError::InvalidJob).
    async fn get(&self, id: u64) -> Result<JobMessage>;

    /// Forget a job entirely. Idempotent.
    async fn remove(&self, id: u64) -> Result<()>;

    /// Move a reserved id to the delayed set, ready after `delay`.
    ///
    /// Returns false when the id was not reserved, in which case nothing changes.
    async fn release(&self, id: u64, delay: Duration) -> Result<bool>;

    /// Move a reserved id to the failed set with a diagnostic blob.
    ///
    /// Returns false when the id was not reserved, in which case nothing changes.
    async fn failed(&self, id: u64, diagnostic: &str) -> Result<bool>;

    async fn status(&self) -> Result<QueueStatus>;

    /// Status of one id, inferred from set membership.
    async fn job_status(&self, id: u64) -> Result<JobStatus>;

    /// Move every delayed id whose time has come onto the waiting list.
    async fn migrate_expired(&self) -> Result<Vec<u64>>;

    /// Release every reserved id. Run once when a listener starts, since
    /// nothing can still be working on them.
    async fn retry_reserved(&self) -> Result<Vec<u64>>;

    async fn get_failed(&self) -> Result<Vec<FailedJob>>;

    /// Drop a dead letter together with its body. Idempotent.
    async fn clear_failed(&self, id: u64) -> Result<()>;

    /// Move a failed id back to the delayed set.
    async fn reload_failed(&self, id: u64, delay: Duration) -> Result<bool>;

    /// Delete every key of the channel.
    async fn clear(&self) -> Result<()>;

    /// Hand a reserved id to the workers of one strategy.
    async fn push_ready(&self, id: u64, kind: WorkerKind) -> Result<()>;

    /// Put an id back at the head of a ready list, so it is popped next.
    async fn return_ready(&self, id: u64, kind: WorkerKind) -> Result<()>;

    async fn pop_ready(&self, kind: WorkerKind) -> Result<Option<u64>>;

    async fn ready_len(&self, kind: WorkerKind) -> Result<u64>;
}
