//! Job executor
//!
//! The one place a job's outcome is decided. Success removes the job; a
//! failure the job wants retried releases it with backoff; anything else
//! lands in the failed set with a diagnostic. Every strategy goes through
//! [`JobExecutor::execute`], and the single-process strategy's subprocess is
//! nothing but a call to it.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::core::{
    Clock, FailureDiagnostic, Job, JobContext, JobError, JobMessage, SystemClock,
};
use crate::error::{QueueError, Result};
use crate::serializer::JobRegistry;
use crate::storage::Queue;

/// What happened to a job after one run.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Ran successfully and was removed
    Completed,
    /// Failed and was released to run again after `delay`
    Retrying { delay: Duration, error: QueueError },
    /// Moved to the failed set
    Failed { error: QueueError },
}

impl ExecutionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed)
    }
}

/// Runs reserved jobs and records their outcome.
pub struct JobExecutor {
    queue: Arc<dyn Queue>,
    registry: Arc<JobRegistry>,
    clock: Arc<dyn Clock>,
}

impl JobExecutor {
    pub fn new(queue: Arc<dyn Queue>, registry: Arc<JobRegistry>) -> Self {
        Self {
            queue,
            registry,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }

    /// Fetch and decode a job without running it.
    pub async fn load(&self, id: u64) -> Result<(JobMessage, Box<dyn Job>)> {
        let message = self.queue.get(id).await?;
        let job = self.registry.resolve(&message)?;
        Ok((message, job))
    }

    /// Run one reserved job to a recorded outcome.
    ///
    /// Errors are only returned when the outcome itself could not be
    /// recorded, e.g. because the store is unreachable.
    pub async fn execute(&self, id: u64) -> Result<ExecutionOutcome> {
        let message = match self.queue.get(id).await {
            Ok(message) => message,
            Err(error @ QueueError::InvalidJob { .. }) => {
                return self.fail(id, 0, error, None).await;
            }
            Err(e) => return Err(e),
        };

        match self.registry.resolve(&message) {
            Ok(job) => self.run(&message, job.as_ref()).await,
            Err(error) => self.fail(id, message.attempts, error, None).await,
        }
    }

    /// Run an already loaded job.
    pub async fn run(&self, message: &JobMessage, job: &dyn Job) -> Result<ExecutionOutcome> {
        let ctx = JobContext::new(message.id, message.attempts, Arc::clone(&self.queue));
        debug!(
            "Executing job {} (attempt {}) on channel '{}'",
            message.id,
            message.attempts,
            self.queue.channel()
        );

        let handled = AssertUnwindSafe(job.handle(&ctx)).catch_unwind();
        let result = match job.ttr() {
            Some(ttr) => match timeout(ttr, handled).await {
                Ok(result) => result,
                Err(_) => Ok(Err(JobError::timed_out(ttr))),
            },
            None => handled.await,
        };
        let result = result.unwrap_or_else(|panic| Err(JobError::new("Panic", panic_message(&panic))));

        match result {
            Ok(()) => {
                self.queue.remove(message.id).await?;
                info!("Job {} completed", message.id);
                Ok(ExecutionOutcome::Completed)
            }
            Err(err) => self.handle_failure(message, job, err).await,
        }
    }

    /// Retry-or-fail decision for a job whose body failed.
    pub async fn handle_failure(
        &self,
        message: &JobMessage,
        job: &dyn Job,
        err: JobError,
    ) -> Result<ExecutionOutcome> {
        let (id, attempts) = (message.id, message.attempts);

        if !job.can_retry(attempts, &err) {
            let error = QueueError::TerminalExecution {
                id,
                attempts,
                message: err.to_string(),
            };
            return self.fail(id, attempts, error, Some(&err)).await;
        }

        let now = self.clock.now();
        let delay = whole_seconds_until(job.retry_after(attempts, now) - now);
        if !self.queue.release(id, delay).await? {
            debug!("Job {} was no longer reserved when released", id);
        }

        let error = QueueError::RetryableExecution {
            id,
            attempts,
            message: err.to_string(),
        };
        warn!("{}; next attempt in {}s", error, delay.as_secs());
        Ok(ExecutionOutcome::Retrying { delay, error })
    }

    /// Move a reserved job to the failed set.
    pub async fn fail(
        &self,
        id: u64,
        attempts: u32,
        error: QueueError,
        cause: Option<&JobError>,
    ) -> Result<ExecutionOutcome> {
        let diagnostic = match cause {
            Some(cause) => FailureDiagnostic::new(&cause.kind, &cause.message, attempts),
            None => FailureDiagnostic::from_error(&error, attempts),
        };

        if !self.queue.failed(id, &diagnostic.to_json()?).await? {
            debug!("Job {} was no longer reserved when marked failed", id);
        }
        error!("{}", error);
        Ok(ExecutionOutcome::Failed { error })
    }
}

/// Round a backoff up to whole seconds, the resolution of stored scores.
fn whole_seconds_until(delta: chrono::Duration) -> Duration {
    let millis = delta.num_milliseconds().max(0) as u64;
    Duration::from_secs(millis.div_ceil(1000))
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "job panicked".to_string()
    }
}
