//! One OS process per job.
//!
//! The runner blocks on each job subprocess until it exits or its TTR runs
//! out. The subprocess records the outcome itself through the executor; the
//! runner only steps in when the subprocess could not.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::next_ready;
use crate::core::{JobError, JobStatus};
use crate::error::{QueueError, Result};
use crate::processing::control::WorkerControl;
use crate::processing::executor::JobExecutor;
use crate::processing::supervisor::CommandTemplate;
use crate::processing::WorkerKind;

const KIND: WorkerKind = WorkerKind::Process;

pub(super) async fn run(
    executor: &JobExecutor,
    control: &WorkerControl,
    template: &CommandTemplate,
    max_execute: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let queue = executor.queue().as_ref();

    while let Some(id) = next_ready(queue, KIND, control, poll_interval).await? {
        if let Err(e) = run_one(executor, control, template, id, max_execute).await {
            error!("Job {} could not be run in a subprocess: {}", id, e);
            if e.is_transient() {
                continue;
            }
            let error = QueueError::TerminalExecution {
                id,
                attempts: 0,
                message: e.to_string(),
            };
            if let Err(e) = executor.fail(id, 0, error, None).await {
                warn!("Job {} could not be marked failed: {}", id, e);
            }
        }
    }
    Ok(())
}

async fn run_one(
    executor: &JobExecutor,
    control: &WorkerControl,
    template: &CommandTemplate,
    id: u64,
    max_execute: Duration,
) -> Result<()> {
    let (message, job) = match executor.load(id).await {
        Ok(loaded) => loaded,
        // Let the executor record the invalid payload
        Err(QueueError::InvalidJob { .. }) => {
            executor.execute(id).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let ttr = job.ttr().unwrap_or(max_execute);

    let mut child = template.command(Some(id)).kill_on_drop(true).spawn()?;
    debug!("Job {} running in subprocess {:?}", id, child.id());

    tokio::select! {
        waited = timeout(ttr, child.wait()) => match waited {
            Ok(status) => after_exit(executor, id, message.attempts, status?).await,
            Err(_) => {
                warn!("Job {} exceeded its {:?} time to run, killing subprocess", id, ttr);
                child.kill().await?;
                let cause = JobError::timed_out(ttr);
                let error = QueueError::TerminalExecution {
                    id,
                    attempts: message.attempts,
                    message: cause.to_string(),
                };
                executor.fail(id, message.attempts, error, Some(&cause)).await?;
                Ok(())
            }
        },
        _ = control.terminated() => {
            child.kill().await?;
            executor.queue().release(id, Duration::ZERO).await?;
            debug!("Released job {} after terminate", id);
            Ok(())
        }
    }
}

/// A subprocess that exits with the job still reserved never recorded an
/// outcome, e.g. because it crashed.
async fn after_exit(
    executor: &JobExecutor,
    id: u64,
    attempts: u32,
    status: ExitStatus,
) -> Result<()> {
    if executor.queue().job_status(id).await? != JobStatus::Reserved {
        return Ok(());
    }

    let cause = JobError::new(
        "ProcessExitError",
        format!("job process exited with {} without recording an outcome", status),
    );
    let error = QueueError::TerminalExecution {
        id,
        attempts,
        message: cause.to_string(),
    };
    executor.fail(id, attempts, error, Some(&cause)).await?;
    Ok(())
}
