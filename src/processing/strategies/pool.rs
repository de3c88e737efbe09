//! Long-lived worker running jobs in-process.

use std::time::Duration;
use tracing::{debug, error, warn};

use super::{check_memory, next_ready};
use crate::error::Result;
use crate::processing::WorkerKind;
use crate::processing::control::WorkerControl;
use crate::processing::executor::JobExecutor;

const KIND: WorkerKind = WorkerKind::ProcessPool;

pub(super) async fn run(
    executor: &JobExecutor,
    control: &WorkerControl,
    memory_limit_mb: u64,
    poll_interval: Duration,
) -> Result<()> {
    let queue = executor.queue().as_ref();

    while let Some(id) = next_ready(queue, KIND, control, poll_interval).await? {
        tokio::select! {
            outcome = executor.execute(id) => {
                match outcome {
                    Ok(outcome) => debug!("Job {} finished: {:?}", id, outcome),
                    Err(e) => error!("Job {} outcome could not be recorded: {}", id, e),
                }
            }
            _ = control.terminated() => {
                match queue.release(id, Duration::ZERO).await {
                    Ok(_) => debug!("Released job {} after terminate", id),
                    Err(e) => warn!("Job {} stays reserved after terminate: {}", id, e),
                }
                break;
            }
        }

        check_memory(KIND, control, memory_limit_mb);
    }
    Ok(())
}
