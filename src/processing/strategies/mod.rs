//! The three worker strategies.
//!
//! All three share the master side: a [`GroupStrategy`] that pushes received
//! ids onto the strategy's ready list and supervises a [`ProcessGroup`] of
//! `worker:run` children. They differ in what a child does with the ids it
//! takes, which is what [`WorkerRuntime`] selects.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::control::WorkerControl;
use super::executor::JobExecutor;
use super::supervisor::{CommandTemplate, ProcessGroup, WorkerRecord};
use super::worker::{ElasticConfig, WorkersConfig};
use super::{WorkerKind, WorkerStrategy};
use crate::error::Result;
use crate::storage::Queue;

mod coroutine;
mod pool;
mod process;

/// Master-side half of a strategy.
pub struct GroupStrategy {
    queue: Arc<dyn Queue>,
    group: ProcessGroup,
    workers: usize,
    elastic: ElasticConfig,
}

impl GroupStrategy {
    pub fn new(
        queue: Arc<dyn Queue>,
        group: ProcessGroup,
        workers: usize,
        elastic: ElasticConfig,
    ) -> Self {
        Self {
            queue,
            group,
            workers,
            elastic,
        }
    }

    /// Strategy for `kind` running this executable's `worker:run` children.
    pub fn from_config(
        kind: WorkerKind,
        queue: Arc<dyn Queue>,
        config: &WorkersConfig,
    ) -> Result<Self> {
        let template = CommandTemplate::worker(queue.channel(), kind)?;
        let group = ProcessGroup::new(kind, template, config.stop_timeout);

        let (workers, elastic) = match kind {
            WorkerKind::Process => (config.process.worker_number, config.process.elastic.clone()),
            WorkerKind::ProcessPool => (
                config.process_pool.worker_number,
                config.process_pool.elastic.clone(),
            ),
            // A single process; its concurrency lives inside
            WorkerKind::Coroutine => (
                1,
                ElasticConfig {
                    enabled: false,
                    ..ElasticConfig::default()
                },
            ),
        };
        Ok(Self::new(queue, group, workers, elastic))
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    fn initial_workers(&self) -> usize {
        if self.elastic.enabled {
            self.elastic.min_workers.max(1)
        } else {
            self.workers.max(1)
        }
    }

    /// Hand ready ids that no worker took back to the queue.
    async fn release_unclaimed(&self) -> Result<()> {
        let kind = self.group.kind();
        let mut released = 0;
        while let Some(id) = self.queue.pop_ready(kind).await? {
            if self.queue.release(id, Duration::ZERO).await? {
                released += 1;
            }
        }
        if released > 0 {
            info!("Released {} unclaimed {} jobs", released, kind);
        }
        Ok(())
    }
}

#[async_trait]
impl WorkerStrategy for GroupStrategy {
    fn kind(&self) -> WorkerKind {
        self.group.kind()
    }

    async fn start(&self) -> Result<Vec<u32>> {
        self.group.start(self.initial_workers())
    }

    async fn stop(&self) -> Result<()> {
        self.group.stop().await;
        self.release_unclaimed().await
    }

    async fn wait(&self) -> Result<()> {
        self.group.wait().await;
        self.release_unclaimed().await
    }

    fn is_running(&self) -> bool {
        self.group.is_running()
    }

    async fn receive(&self, id: u64) -> Result<()> {
        self.queue.push_ready(id, self.group.kind()).await
    }

    async fn rebalance(&self) -> Result<()> {
        if !self.elastic.enabled || self.group.is_draining() {
            return Ok(());
        }
        let depth = self.queue.ready_len(self.group.kind()).await?;
        self.group.scale_to(self.elastic.desired(depth))
    }

    fn workers(&self) -> Vec<WorkerRecord> {
        self.group.records()
    }
}

/// Child-side half of a strategy: the body of `worker:run`.
pub struct WorkerRuntime {
    kind: WorkerKind,
    executor: Arc<JobExecutor>,
    config: WorkersConfig,
    control: WorkerControl,
    job_command: Option<CommandTemplate>,
}

impl WorkerRuntime {
    pub fn new(kind: WorkerKind, executor: Arc<JobExecutor>, config: WorkersConfig) -> Self {
        Self {
            kind,
            executor,
            config,
            control: WorkerControl::new(),
            job_command: None,
        }
    }

    /// Command used by the single-process strategy to run one job.
    /// Defaults to this executable's `queue:run`.
    pub fn with_job_command(mut self, template: CommandTemplate) -> Self {
        self.job_command = Some(template);
        self
    }

    pub fn control(&self) -> &WorkerControl {
        &self.control
    }

    /// Run until drained or terminated and return the process exit code.
    pub async fn run(self) -> Result<i32> {
        info!(
            "{} worker {} started on channel '{}'",
            self.kind,
            std::process::id(),
            self.executor.queue().channel()
        );

        match self.kind {
            WorkerKind::Process => {
                let template = match self.job_command {
                    Some(template) => template,
                    None => CommandTemplate::job(self.executor.queue().channel())?,
                };
                process::run(
                    &self.executor,
                    &self.control,
                    &template,
                    self.config.process.max_execute,
                    self.config.poll_interval,
                )
                .await?
            }
            WorkerKind::ProcessPool => {
                pool::run(
                    &self.executor,
                    &self.control,
                    self.config.process_pool.memory_limit_mb,
                    self.config.poll_interval,
                )
                .await?
            }
            WorkerKind::Coroutine => {
                coroutine::run(
                    &self.executor,
                    &self.control,
                    &self.config.coroutine,
                    self.config.poll_interval,
                )
                .await?
            }
        }

        let code = self.control.exit_code();
        info!(
            "{} worker {} exiting with code {}",
            self.kind,
            std::process::id(),
            code
        );
        Ok(code)
    }
}

/// Next id from this strategy's ready list, or `None` once the worker should
/// stop taking work. An id popped after draining began goes back to the list.
async fn next_ready(
    queue: &dyn Queue,
    kind: WorkerKind,
    control: &WorkerControl,
    poll_interval: Duration,
) -> Result<Option<u64>> {
    loop {
        if !control.is_working() {
            return Ok(None);
        }

        match queue.pop_ready(kind).await {
            Ok(Some(id)) => {
                if !control.is_working() {
                    if let Err(e) = queue.return_ready(id, kind).await {
                        warn!("{} worker could not return job {} to its list: {}", kind, id, e);
                    }
                    return Ok(None);
                }
                return Ok(Some(id));
            }
            Ok(None) => {}
            Err(e) if e.is_transient() => {
                warn!("{} worker could not poll, retrying: {}", kind, e);
            }
            Err(e) => {
                error!("{} worker poll failed: {}", kind, e);
                return Err(e);
            }
        }

        tokio::select! {
            _ = sleep(poll_interval) => {}
            _ = control.terminated() => return Ok(None),
        }
    }
}

/// Drain-and-restart when resident memory crosses the limit.
fn check_memory(kind: WorkerKind, control: &WorkerControl, limit_mb: u64) {
    let used = super::os::resident_memory_mb();
    if limit_mb > 0 && used > limit_mb {
        warn!(
            "{} worker {} using {}MB (limit {}MB), recycling",
            kind,
            std::process::id(),
            used,
            limit_mb
        );
        control.drain(true);
    }
}
