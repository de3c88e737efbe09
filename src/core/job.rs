//! The job contract.
//!
//! A job is any value implementing [`Job`]. The queue never inspects a job
//! beyond this trait: the executor calls [`Job::handle`], consults
//! [`Job::can_retry`] and [`Job::retry_after`] when it fails, and the worker
//! director uses [`Job::capability`] to pick the strategy that runs it.
//!
//! ## Lifecycle
//!
//! ```text
//! push ─→ Waiting ─→ Reserved ─→ Done
//!   │        ↑          │  └───→ Failed ─→ (reload) ─→ Delayed
//!   └→ Delayed ←────────┘ release
//! ```
//!
//! ## Example
//!
//! ```rust
//! use aint_queue::{Job, JobCapability, JobContext, JobError};
//! use async_trait::async_trait;
//!
//! struct Resize {
//!     path: String,
//! }
//!
//! #[async_trait]
//! impl Job for Resize {
//!     async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
//!         if self.path.is_empty() {
//!             return Err(JobError::new("ArgumentError", "empty path"));
//!         }
//!         Ok(())
//!     }
//!
//!     fn can_retry(&self, attempts: u32, error: &JobError) -> bool {
//!         attempts < 3 && error.kind != "ArgumentError"
//!     }
//!
//!     fn capability(&self) -> JobCapability {
//!         JobCapability::AsyncProcess
//!     }
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::QueueError;
use crate::storage::Queue;

/// Where a job may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobCapability {
    /// Needs its own process with a hard time budget.
    #[default]
    Sync,
    /// Safe to run inside a long-lived pool process.
    AsyncProcess,
    /// Short and non-blocking, safe to share a process with thousands of others.
    CoroutineSafe,
}

impl JobCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCapability::Sync => "sync",
            JobCapability::AsyncProcess => "async-process",
            JobCapability::CoroutineSafe => "coroutine-safe",
        }
    }

    /// Parse a capability tag. Unknown tags map to [`JobCapability::Sync`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "async-process" => JobCapability::AsyncProcess,
            "coroutine-safe" => JobCapability::CoroutineSafe,
            _ => JobCapability::Sync,
        }
    }
}

impl fmt::Display for JobCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a job body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Error class, e.g. `NetworkError`. Used by retry policies.
    pub kind: String,
    pub message: String,
}

impl JobError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Error without a specific class.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new("JobError", message)
    }

    pub fn timed_out(ttr: std::time::Duration) -> Self {
        Self::new(
            "TimeoutError",
            format!("job exceeded its time-to-run of {}s", ttr.as_secs()),
        )
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for JobError {}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<serde_json::Error> for JobError {
    fn from(err: serde_json::Error) -> Self {
        Self::new("SerializationError", err.to_string())
    }
}

/// What a running job knows about itself.
#[derive(Clone)]
pub struct JobContext {
    pub id: u64,
    /// Attempt number of this run, starting at 1.
    pub attempts: u32,
    queue: Arc<dyn Queue>,
}

impl JobContext {
    pub fn new(id: u64, attempts: u32, queue: Arc<dyn Queue>) -> Self {
        Self {
            id,
            attempts,
            queue,
        }
    }

    pub fn channel(&self) -> &str {
        self.queue.channel()
    }

    /// The queue the job was popped from, for pushing follow-up jobs.
    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("id", &self.id)
            .field("attempts", &self.attempts)
            .field("channel", &self.channel())
            .finish()
    }
}

/// A unit of work executed by a worker.
#[async_trait]
pub trait Job: Send + Sync {
    /// Run the job body.
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Whether a failure on this attempt should be retried.
    fn can_retry(&self, _attempts: u32, _error: &JobError) -> bool {
        false
    }

    /// When the next attempt may run. Defaults to a linear 60s-per-attempt backoff.
    fn retry_after(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(60 * attempts as i64)
    }

    /// Time-to-run budget. `None` means unbounded.
    fn ttr(&self) -> Option<std::time::Duration> {
        None
    }

    fn capability(&self) -> JobCapability {
        JobCapability::Sync
    }
}
