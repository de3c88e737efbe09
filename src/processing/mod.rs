//! Job Processing Engine
//!
//! The listener process ([`Manager`]) pops jobs and hands them to a
//! [`WorkerDirector`], which routes each one to a [`WorkerStrategy`] by the
//! job's capability. Strategies run their jobs in supervised child
//! processes; every strategy ends up in the same [`JobExecutor`] path that
//! decides between remove, release and fail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{QueueError, Result};

pub mod control;
pub mod director;
pub mod executor;
pub mod manager;
pub mod os;
pub mod pid;
pub mod retry;
pub mod snapshot;
pub mod strategies;
pub mod supervisor;
pub mod worker;

pub use control::WorkerControl;
pub use director::WorkerDirector;
pub use executor::{ExecutionOutcome, JobExecutor};
pub use manager::{ControlMessage, Manager, ManagerConfig, ManagerHandle, ManagerState};
pub use pid::PidFile;
pub use retry::{RetryPolicy, RetryStrategy};
pub use snapshot::{SnapshotHandler, SnapshotLogger, WaitingThresholdAlert};
pub use strategies::{GroupStrategy, WorkerRuntime};
pub use supervisor::{CommandTemplate, ProcessGroup, WorkerRecord};
pub use worker::{
    CoroutineWorkerConfig, ElasticConfig, ProcessPoolConfig, ProcessWorkerConfig, WorkersConfig,
};

/// The three execution backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// One OS process per job
    Process,
    /// Long-lived OS processes running jobs in-process
    ProcessPool,
    /// One OS process running many jobs as concurrent tasks
    Coroutine,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 3] = [
        WorkerKind::Process,
        WorkerKind::ProcessPool,
        WorkerKind::Coroutine,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Process => "process",
            WorkerKind::ProcessPool => "process_pool",
            WorkerKind::Coroutine => "coroutine",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        WorkerKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| QueueError::configuration(format!("unknown worker kind '{}'", s)))
    }
}

/// Lifecycle of one worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Starting,
    Running,
    /// Finishing the current job before exiting
    Draining,
    Stopped,
}

/// Control requests a worker understands, independent of signal numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerSignal {
    /// Finish the current job, exit, and get respawned
    Reload,
    /// Finish the current job and exit for good
    Drain,
    /// Stop now, returning unfinished work to the queue
    Terminate,
    /// Uncatchable last resort after a stop timeout
    Kill,
}

impl WorkerSignal {
    pub fn as_raw(&self) -> libc::c_int {
        match self {
            WorkerSignal::Reload => libc::SIGUSR1,
            WorkerSignal::Drain => libc::SIGUSR2,
            WorkerSignal::Terminate => libc::SIGTERM,
            WorkerSignal::Kill => libc::SIGKILL,
        }
    }
}

/// An execution backend owned by the director.
///
/// Implementations manage their own worker processes. `receive` only hands
/// the id over; the worker that picks it up runs it through the executor.
#[async_trait]
pub trait WorkerStrategy: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Spawn the strategy's workers and return their pids.
    async fn start(&self) -> Result<Vec<u32>>;

    /// Stop without waiting for in-flight jobs. Unfinished jobs go back to the queue.
    async fn stop(&self) -> Result<()>;

    /// Let every worker finish its current job, then return once all have exited.
    async fn wait(&self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Queue a reserved id for this strategy's workers.
    async fn receive(&self, id: u64) -> Result<()>;

    /// Resize the worker set to the current backlog.
    async fn rebalance(&self) -> Result<()> {
        Ok(())
    }

    fn workers(&self) -> Vec<WorkerRecord> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_kind_round_trips_through_str() {
        for kind in WorkerKind::ALL {
            assert_eq!(kind.as_str().parse::<WorkerKind>().unwrap(), kind);
        }
        assert!("threads".parse::<WorkerKind>().is_err());
    }

    #[test]
    fn test_signal_numbers() {
        assert_eq!(WorkerSignal::Reload.as_raw(), libc::SIGUSR1);
        assert_eq!(WorkerSignal::Drain.as_raw(), libc::SIGUSR2);
        assert_eq!(WorkerSignal::Terminate.as_raw(), libc::SIGTERM);
    }
}
