//! Worker director
//!
//! Owns one instance of each enabled strategy and routes popped jobs to
//! them by capability:
//!
//! | Capability       | Strategy        |
//! |------------------|-----------------|
//! | `coroutine-safe` | coroutine       |
//! | `async-process`  | process pool    |
//! | `sync` (default) | single process  |
//!
//! A job whose preferred strategy is disabled falls back to the
//! single-process strategy.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info};

use super::strategies::GroupStrategy;
use super::supervisor::WorkerRecord;
use super::worker::WorkersConfig;
use super::{WorkerKind, WorkerStrategy};
use crate::core::{Job, JobCapability};
use crate::error::{QueueError, Result};
use crate::storage::Queue;

#[derive(Default)]
pub struct WorkerDirector {
    strategies: Vec<Arc<dyn WorkerStrategy>>,
}

impl WorkerDirector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a strategy, replacing any existing one of the same kind.
    pub fn with_strategy(mut self, strategy: Arc<dyn WorkerStrategy>) -> Self {
        self.strategies.retain(|s| s.kind() != strategy.kind());
        self.strategies.push(strategy);
        self
    }

    /// One supervised strategy per enabled section of the config.
    pub fn from_config(queue: Arc<dyn Queue>, config: &WorkersConfig) -> Result<Self> {
        let enabled = [
            (WorkerKind::Process, config.process.enabled),
            (WorkerKind::ProcessPool, config.process_pool.enabled),
            (WorkerKind::Coroutine, config.coroutine.enabled),
        ];

        let mut director = Self::new();
        for (kind, _) in enabled.into_iter().filter(|(_, on)| *on) {
            let strategy = GroupStrategy::from_config(kind, Arc::clone(&queue), config)?;
            director = director.with_strategy(Arc::new(strategy));
        }

        if director.strategies.is_empty() {
            return Err(QueueError::configuration("no worker strategy is enabled"));
        }
        Ok(director)
    }

    pub fn kinds(&self) -> Vec<WorkerKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub fn strategy(&self, kind: WorkerKind) -> Option<&Arc<dyn WorkerStrategy>> {
        self.strategies.iter().find(|s| s.kind() == kind)
    }

    /// Strategy that runs jobs with this capability.
    pub fn route(&self, capability: JobCapability) -> Result<WorkerKind> {
        let preferred = match capability {
            JobCapability::CoroutineSafe => WorkerKind::Coroutine,
            JobCapability::AsyncProcess => WorkerKind::ProcessPool,
            JobCapability::Sync => WorkerKind::Process,
        };

        [preferred, WorkerKind::Process]
            .into_iter()
            .find(|kind| self.strategy(*kind).is_some())
            .ok_or_else(|| {
                QueueError::configuration(format!(
                    "no enabled strategy can run {} jobs",
                    capability.as_str()
                ))
            })
    }

    /// Hand a reserved job to its strategy.
    pub async fn dispatch(&self, id: u64, job: &dyn Job) -> Result<WorkerKind> {
        let kind = self.route(job.capability())?;
        let strategy = self
            .strategy(kind)
            .ok_or_else(|| QueueError::configuration(format!("{} strategy missing", kind)))?;

        strategy.receive(id).await?;
        debug!("Dispatched job {} to {} strategy", id, kind);
        Ok(kind)
    }

    pub async fn start(&self) -> Result<Vec<u32>> {
        let mut pids = Vec::new();
        for strategy in &self.strategies {
            let started = strategy.start().await?;
            info!("Started {} strategy with {} workers", strategy.kind(), started.len());
            pids.extend(started);
        }
        Ok(pids)
    }

    /// Stop every strategy at once.
    pub async fn stop(&self) -> Result<()> {
        try_join_all(self.strategies.iter().map(|s| s.stop())).await?;
        Ok(())
    }

    /// Drain every strategy and wait for all workers to exit.
    pub async fn wait(&self) -> Result<()> {
        try_join_all(self.strategies.iter().map(|s| s.wait())).await?;
        Ok(())
    }

    pub async fn rebalance(&self) -> Result<()> {
        for strategy in &self.strategies {
            strategy.rebalance().await?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.strategies.iter().any(|s| s.is_running())
    }

    pub fn workers(&self) -> Vec<WorkerRecord> {
        self.strategies.iter().flat_map(|s| s.workers()).collect()
    }
}

impl std::fmt::Debug for WorkerDirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDirector")
            .field("strategies", &self.kinds())
            .finish()
    }
}
