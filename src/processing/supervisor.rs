//! Supervised worker processes.
//!
//! A [`ProcessGroup`] owns the children of one strategy. Each child gets a
//! monitor task that waits for it to exit and decides whether to replace it:
//! a child is respawned unless the group is draining or the child exited
//! with code 1, which is how a worker says it was told to stop for good.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::os::send_signal;
use super::{WorkerKind, WorkerSignal, WorkerStatus};
use crate::error::{QueueError, Result};

const ID_PLACEHOLDER: &str = "{id}";

/// Program and arguments for a child process. `{id}` in an argument is
/// replaced with a job id when the command is built.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn current_exe() -> Result<PathBuf> {
        Ok(std::env::current_exe()?)
    }

    /// `aint-queue worker:run` for one strategy.
    pub fn worker(channel: &str, kind: WorkerKind) -> Result<Self> {
        Ok(Self::new(
            Self::current_exe()?,
            ["worker:run", "--channel", channel, "--kind", kind.as_str()],
        ))
    }

    /// `aint-queue queue:run`, the body of a single-process job.
    pub fn job(channel: &str) -> Result<Self> {
        Ok(Self::new(
            Self::current_exe()?,
            ["queue:run", "--channel", channel, "--id", ID_PLACEHOLDER],
        ))
    }

    pub fn command(&self, id: Option<u64>) -> Command {
        let mut command = Command::new(&self.program);
        for arg in &self.args {
            match id {
                Some(id) => command.arg(arg.replace(ID_PLACEHOLDER, &id.to_string())),
                None => command.arg(arg),
            };
        }
        command.stdin(Stdio::null());
        command
    }
}

/// One supervised child as seen by the director.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerRecord {
    pub kind: WorkerKind,
    pub pid: u32,
    pub status: WorkerStatus,
}

#[derive(Clone)]
pub struct ProcessGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    kind: WorkerKind,
    template: CommandTemplate,
    stop_timeout: Duration,
    workers: Mutex<HashMap<u32, WorkerStatus>>,
    draining: AtomicBool,
    spawned: AtomicUsize,
    exited: Notify,
}

impl ProcessGroup {
    pub fn new(kind: WorkerKind, template: CommandTemplate, stop_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                kind,
                template,
                stop_timeout,
                workers: Mutex::new(HashMap::new()),
                draining: AtomicBool::new(false),
                spawned: AtomicUsize::new(0),
                exited: Notify::new(),
            }),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.inner.kind
    }

    /// Spawn `count` children and leave draining mode.
    pub fn start(&self, count: usize) -> Result<Vec<u32>> {
        self.inner.draining.store(false, Ordering::SeqCst);
        (0..count).map(|_| self.spawn()).collect()
    }

    /// Spawn one child and its monitor task.
    pub fn spawn(&self) -> Result<u32> {
        let mut child = self.inner.template.command(None).spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| QueueError::Io {
                message: "child exited before its pid was read".to_string(),
            })?;

        self.lock_workers().insert(pid, WorkerStatus::Running);
        self.inner.spawned.fetch_add(1, Ordering::SeqCst);
        info!("Started {} worker {}", self.inner.kind, pid);

        let group = self.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            group.on_exit(pid, status);
        });
        Ok(pid)
    }

    fn on_exit(&self, pid: u32, status: std::io::Result<ExitStatus>) {
        let code = status.as_ref().ok().and_then(ExitStatus::code);
        self.lock_workers().remove(&pid);
        self.inner.exited.notify_waiters();

        if self.is_draining() {
            debug!("{} worker {} exited while draining", self.inner.kind, pid);
            return;
        }
        if code == Some(1) {
            info!("{} worker {} stopped and will not be replaced", self.inner.kind, pid);
            return;
        }

        warn!(
            "{} worker {} exited with {:?}, respawning",
            self.inner.kind, pid, status
        );
        if let Err(e) = self.spawn() {
            error!("Failed to respawn {} worker: {}", self.inner.kind, e);
        }
    }

    /// Ask every child to finish its current job, then wait for all to exit.
    pub async fn wait(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
        self.signal_all(WorkerSignal::Drain, WorkerStatus::Draining);
        self.wait_until_empty(None).await;
    }

    /// SIGTERM every child, then SIGKILL whatever is left after the stop timeout.
    pub async fn stop(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
        self.signal_all(WorkerSignal::Terminate, WorkerStatus::Stopped);

        if !self.wait_until_empty(Some(self.inner.stop_timeout)).await {
            warn!(
                "{} workers still running after {:?}, killing",
                self.inner.kind, self.inner.stop_timeout
            );
            self.signal_all(WorkerSignal::Kill, WorkerStatus::Stopped);
            self.wait_until_empty(Some(self.inner.stop_timeout)).await;
        }
    }

    /// Grow or shrink towards `desired` running children. Shrinking drains
    /// randomly chosen children.
    pub fn scale_to(&self, desired: usize) -> Result<()> {
        let mut running: Vec<u32> = self
            .lock_workers()
            .iter()
            .filter(|(_, status)| **status == WorkerStatus::Running)
            .map(|(pid, _)| *pid)
            .collect();
        let current = running.len();

        if desired > current {
            info!("Scaling {} workers {} -> {}", self.inner.kind, current, desired);
            for _ in current..desired {
                self.spawn()?;
            }
        } else if desired < current {
            info!("Scaling {} workers {} -> {}", self.inner.kind, current, desired);
            fastrand::shuffle(&mut running);
            for pid in running.into_iter().take(current - desired) {
                self.signal(pid, WorkerSignal::Drain, WorkerStatus::Draining);
            }
        }
        Ok(())
    }

    pub fn records(&self) -> Vec<WorkerRecord> {
        let mut records: Vec<WorkerRecord> = self
            .lock_workers()
            .iter()
            .map(|(pid, status)| WorkerRecord {
                kind: self.inner.kind,
                pid: *pid,
                status: *status,
            })
            .collect();
        records.sort_by_key(|record| record.pid);
        records
    }

    pub fn len(&self) -> usize {
        self.lock_workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        !self.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Children started over the group's lifetime, respawns included
    pub fn spawned(&self) -> usize {
        self.inner.spawned.load(Ordering::SeqCst)
    }

    /// Wait for every child to exit. Returns false on timeout.
    pub async fn wait_until_empty(&self, limit: Option<Duration>) -> bool {
        let drained = async {
            loop {
                let exited = self.inner.exited.notified();
                if self.is_empty() {
                    return;
                }
                exited.await;
            }
        };
        match limit {
            Some(limit) => tokio::time::timeout(limit, drained).await.is_ok(),
            None => {
                drained.await;
                true
            }
        }
    }

    fn signal_all(&self, signal: WorkerSignal, status: WorkerStatus) {
        let pids: Vec<u32> = self.lock_workers().keys().copied().collect();
        for pid in pids {
            self.signal(pid, signal, status);
        }
    }

    fn signal(&self, pid: u32, signal: WorkerSignal, status: WorkerStatus) {
        if let Some(current) = self.lock_workers().get_mut(&pid) {
            *current = status;
        }
        if let Err(e) = send_signal(pid, signal) {
            debug!("Could not signal {} worker {}: {}", self.inner.kind, pid, e);
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, HashMap<u32, WorkerStatus>> {
        self.inner.workers.lock().unwrap()
    }
}

impl std::fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("kind", &self.inner.kind)
            .field("workers", &self.records())
            .field("draining", &self.is_draining())
            .finish()
    }
}
