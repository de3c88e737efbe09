//! Many jobs as concurrent tasks inside one worker process.
//!
//! A semaphore caps in-flight tasks at `max_coroutines`. An id that arrives
//! with every slot taken is released with the cooldown delay instead of
//! being queued in memory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::{check_memory, next_ready};
use crate::error::{QueueError, Result};
use crate::processing::WorkerKind;
use crate::processing::control::WorkerControl;
use crate::processing::executor::{ExecutionOutcome, JobExecutor};
use crate::processing::worker::CoroutineWorkerConfig;

const KIND: WorkerKind = WorkerKind::Coroutine;

type TaskResult = (u64, Result<ExecutionOutcome>);

pub(super) async fn run(
    executor: &Arc<JobExecutor>,
    control: &WorkerControl,
    config: &CoroutineWorkerConfig,
    poll_interval: Duration,
) -> Result<()> {
    let queue = executor.queue().as_ref();
    let slots = Arc::new(Semaphore::new(config.max_coroutines));
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();
    let mut in_flight: HashSet<u64> = HashSet::new();

    while let Some(id) = next_ready(queue, KIND, control, poll_interval).await? {
        while let Some(joined) = tasks.try_join_next() {
            reap(joined, &mut in_flight);
        }

        match Arc::clone(&slots).try_acquire_owned() {
            Ok(permit) => {
                let executor = Arc::clone(executor);
                in_flight.insert(id);
                tasks.spawn(async move {
                    let outcome = executor.execute(id).await;
                    drop(permit);
                    (id, outcome)
                });
            }
            Err(_) => {
                let error = QueueError::ConcurrencyExceeded {
                    limit: config.max_coroutines,
                };
                warn!("{}; releasing job {} for {:?}", error, id, config.cooldown);
                if let Err(e) = queue.release(id, config.cooldown).await {
                    warn!("Job {} stays reserved, release failed: {}", id, e);
                }
            }
        }

        check_memory(KIND, control, config.memory_limit_mb);
    }

    // Draining: let running tasks finish unless terminated meanwhile
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(joined) => reap(joined, &mut in_flight),
                None => break,
            },
            _ = control.terminated() => {
                tasks.abort_all();
                while let Some(joined) = tasks.join_next().await {
                    reap(joined, &mut in_flight);
                }
                break;
            }
        }
    }

    for id in in_flight {
        match queue.release(id, Duration::ZERO).await {
            Ok(_) => debug!("Released job {} after terminate", id),
            Err(e) => warn!("Job {} stays reserved after terminate: {}", id, e),
        }
    }
    Ok(())
}

fn reap(joined: std::result::Result<TaskResult, tokio::task::JoinError>, in_flight: &mut HashSet<u64>) {
    match joined {
        Ok((id, outcome)) => {
            in_flight.remove(&id);
            match outcome {
                Ok(outcome) => debug!("Job {} finished: {:?}", id, outcome),
                Err(e) => error!("Job {} outcome could not be recorded: {}", id, e),
            }
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!("Coroutine task failed: {}", e),
    }
}
