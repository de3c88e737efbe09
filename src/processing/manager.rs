//! Listener loop for one channel
//!
//! [`Manager::listen`] is the body of `queue:listen`. It claims the channel
//! through a pid file, recovers reservations left by a previous run, starts
//! the director and then interleaves:
//!
//! - the poll loop (a spawned task popping ids and dispatching them)
//! - the expire-migration timer
//! - the snapshot timer feeding [`SnapshotHandler`]s
//! - the elastic rebalance timer
//! - control messages from signals or a [`ManagerHandle`]
//!
//! Terminate stops every strategy without waiting; reload drains them and
//! starts fresh workers in a task of its own, so the timers keep running. A
//! terminate that arrives mid-reload abandons it and stops everything.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, Interval, interval_at, sleep};
use tracing::{debug, error, info, warn};

use super::director::WorkerDirector;
use super::os::resident_memory_mb;
use super::pid::PidFile;
use super::snapshot::{SnapshotHandler, WaitingThresholdAlert};
use super::worker::WorkersConfig;
use crate::core::FailureDiagnostic;
use crate::error::{QueueError, Result};
use crate::serializer::JobRegistry;
use crate::storage::Queue;

/// Listener settings for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub channel: String,
    /// Directory holding `{channel}-master.pid`
    pub pid_path: PathBuf,
    /// Master resident memory that triggers drain-and-exit
    pub memory_limit_mb: u64,
    /// Sleep after an empty pop
    pub sleep_interval: Duration,
    /// Reservation expiry recorded by pop
    pub handle_timeout: Duration,
    pub migrate_interval: Duration,
    pub snapshot_interval: Duration,
    /// Warn when more jobs than this are waiting
    pub waiting_threshold: Option<u64>,
    /// Translate SIGTERM, SIGINT and SIGUSR1 into control messages
    pub handle_signals: bool,
    pub workers: WorkersConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            channel: "default".to_string(),
            pid_path: std::env::temp_dir(),
            memory_limit_mb: 512,
            sleep_interval: Duration::from_secs(1),
            handle_timeout: Duration::from_secs(60),
            migrate_interval: Duration::from_secs(1),
            snapshot_interval: Duration::from_secs(300),
            waiting_threshold: None,
            handle_signals: true,
            workers: WorkersConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    pub fn pid_path(mut self, pid_path: impl Into<PathBuf>) -> Self {
        self.pid_path = pid_path.into();
        self
    }

    pub fn memory_limit_mb(mut self, memory_limit_mb: u64) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    pub fn sleep_interval(mut self, sleep_interval: Duration) -> Self {
        self.sleep_interval = sleep_interval;
        self
    }

    pub fn handle_timeout(mut self, handle_timeout: Duration) -> Self {
        self.handle_timeout = handle_timeout;
        self
    }

    pub fn migrate_interval(mut self, migrate_interval: Duration) -> Self {
        self.migrate_interval = migrate_interval;
        self
    }

    pub fn snapshot_interval(mut self, snapshot_interval: Duration) -> Self {
        self.snapshot_interval = snapshot_interval;
        self
    }

    pub fn waiting_threshold(mut self, threshold: u64) -> Self {
        self.waiting_threshold = Some(threshold);
        self
    }

    pub fn handle_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    pub fn workers(mut self, workers: WorkersConfig) -> Self {
        self.workers = workers;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    Idle,
    Listening,
    Draining,
    Stopped,
}

/// Requests a running manager acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Stop every strategy and exit
    Terminate,
    /// Drain every strategy, then start fresh workers
    Reload,
    /// Drain every strategy and exit
    Drain,
}

/// Cloneable remote control for a [`Manager`].
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    control: mpsc::UnboundedSender<ControlMessage>,
    state: watch::Receiver<ManagerState>,
}

impl ManagerHandle {
    pub fn send(&self, message: ControlMessage) -> Result<()> {
        self.control
            .send(message)
            .map_err(|_| QueueError::configuration("manager is no longer running"))
    }

    pub fn terminate(&self) -> Result<()> {
        self.send(ControlMessage::Terminate)
    }

    pub fn reload(&self) -> Result<()> {
        self.send(ControlMessage::Reload)
    }

    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    /// Resolve once the manager reaches `state`.
    pub async fn wait_for(&mut self, state: ManagerState) -> Result<()> {
        self.state
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| QueueError::configuration("manager dropped before reaching state"))
    }
}

pub struct Manager {
    config: ManagerConfig,
    queue: Arc<dyn Queue>,
    registry: Arc<JobRegistry>,
    director: Arc<WorkerDirector>,
    snapshot_handlers: Vec<Arc<dyn SnapshotHandler>>,
    state: Arc<watch::Sender<ManagerState>>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        queue: Arc<dyn Queue>,
        registry: Arc<JobRegistry>,
        director: WorkerDirector,
    ) -> Self {
        let (state, _) = watch::channel(ManagerState::Idle);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let mut snapshot_handlers: Vec<Arc<dyn SnapshotHandler>> = Vec::new();
        if let Some(threshold) = config.waiting_threshold {
            snapshot_handlers.push(Arc::new(WaitingThresholdAlert::new(threshold)));
        }

        Self {
            config,
            queue,
            registry,
            director: Arc::new(director),
            snapshot_handlers,
            state: Arc::new(state),
            control_tx,
            control_rx,
        }
    }

    pub fn with_snapshot_handler(mut self, handler: Arc<dyn SnapshotHandler>) -> Self {
        self.snapshot_handlers.push(handler);
        self
    }

    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            control: self.control_tx.clone(),
            state: self.state.subscribe(),
        }
    }

    pub fn state(&self) -> ManagerState {
        *self.state.borrow()
    }

    pub fn director(&self) -> &WorkerDirector {
        &self.director
    }

    /// Run until terminated or drained.
    ///
    /// Fails with [`QueueError::AlreadyRunning`] when another live listener
    /// owns the channel.
    pub async fn listen(mut self) -> Result<()> {
        let channel = self.config.channel.clone();
        let _pid_file = PidFile::acquire(&self.config.pid_path, &channel)?;
        self.state.send_replace(ManagerState::Listening);
        info!("Listening on channel '{}' (pid {})", channel, std::process::id());

        let recovered = self.queue.retry_reserved().await?;
        if !recovered.is_empty() {
            warn!(
                "Recovered {} jobs reserved by a previous run: {:?}",
                recovered.len(),
                recovered
            );
        }

        if let Err(e) = self.director.start().await {
            error!("Failed to start workers: {}", e);
            self.director.stop().await?;
            self.state.send_replace(ManagerState::Stopped);
            return Err(e);
        }

        if self.config.handle_signals {
            forward_signals(self.control_tx.clone())?;
        }

        let poller = tokio::spawn(poll_loop(
            Arc::clone(&self.queue),
            Arc::clone(&self.registry),
            Arc::clone(&self.director),
            self.config.clone(),
            Arc::clone(&self.state),
            self.control_tx.clone(),
        ));

        let mut migrate = ticker(self.config.migrate_interval);
        let mut snapshot = ticker(self.config.snapshot_interval);
        let mut rebalance = ticker(self.config.workers.rebalance_interval);

        // Reloads run beside the timers
        let mut reloads: JoinSet<()> = JoinSet::new();

        let exit = loop {
            tokio::select! {
                Some(message) = self.control_rx.recv() => {
                    info!("Manager received {:?}", message);
                    match message {
                        ControlMessage::Reload if !reloads.is_empty() => {
                            warn!("Reload already in progress, ignoring");
                        }
                        ControlMessage::Reload => {
                            reloads.spawn(reload_workers(
                                Arc::clone(&self.director),
                                self.config.channel.clone(),
                            ));
                        }
                        other => break other,
                    }
                }
                Some(joined) = reloads.join_next(), if !reloads.is_empty() => {
                    if let Err(e) = joined {
                        error!("Reload task ended abnormally: {}", e);
                    }
                }
                _ = migrate.tick() => self.migrate().await,
                _ = snapshot.tick() => self.snapshot().await,
                _ = rebalance.tick() => {
                    if let Err(e) = self.director.rebalance().await {
                        warn!("Rebalance failed: {}", e);
                    }
                }
            }
        };

        if !reloads.is_empty() {
            warn!("{:?} arrived during a reload, abandoning the reload", exit);
            reloads.abort_all();
            while reloads.join_next().await.is_some() {}
        }

        self.state.send_replace(ManagerState::Draining);
        if let Err(e) = poller.await {
            error!("Poll loop ended abnormally: {}", e);
        }

        let result = match exit {
            ControlMessage::Drain => self.director.wait().await,
            _ => self.director.stop().await,
        };
        self.state.send_replace(ManagerState::Stopped);
        info!("Listener for channel '{}' stopped", channel);
        result
    }

    async fn migrate(&self) {
        match self.queue.migrate_expired().await {
            Ok(ids) if !ids.is_empty() => debug!("Migrated {} delayed jobs", ids.len()),
            Ok(_) => {}
            Err(e) => warn!("Expire migration failed: {}", e),
        }
    }

    async fn snapshot(&self) {
        if self.snapshot_handlers.is_empty() {
            return;
        }
        let status = match self.queue.status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("Snapshot status failed: {}", e);
                return;
            }
        };
        for handler in &self.snapshot_handlers {
            if let Err(e) = handler.handle(&self.config.channel, &status).await {
                warn!("Snapshot handler '{}' failed: {}", handler.name(), e);
            }
        }
    }
}

/// Drain every strategy, then start fresh workers.
async fn reload_workers(director: Arc<WorkerDirector>, channel: String) {
    info!("Reloading workers for channel '{}'", channel);
    if let Err(e) = director.wait().await {
        error!("Drain before reload failed: {}", e);
    }
    match director.start().await {
        Ok(pids) => info!("Reload of channel '{}' started {} workers", channel, pids.len()),
        Err(e) => error!("Restart after reload failed: {}", e),
    }
}

/// Interval whose first tick is one period from now.
fn ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    interval_at(Instant::now() + period, period)
}

fn forward_signals(control: mpsc::UnboundedSender<ControlMessage>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut reload = signal(SignalKind::user_defined1())?;

    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(()) = terminate.recv() => ControlMessage::Terminate,
                Some(()) = interrupt.recv() => ControlMessage::Terminate,
                Some(()) = reload.recv() => ControlMessage::Reload,
                else => break,
            };
            if control.send(message).is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// Pop and dispatch until the manager leaves `Listening`.
async fn poll_loop(
    queue: Arc<dyn Queue>,
    registry: Arc<JobRegistry>,
    director: Arc<WorkerDirector>,
    config: ManagerConfig,
    state: Arc<watch::Sender<ManagerState>>,
    control: mpsc::UnboundedSender<ControlMessage>,
) {
    let mut changes = state.subscribe();

    while *state.borrow() == ManagerState::Listening {
        match queue.pop(config.handle_timeout).await {
            Ok(Some(id)) => {
                if let Err(e) = dispatch(queue.as_ref(), &registry, &director, id).await {
                    error!("Failed to dispatch job {}: {}", id, e);
                    mark_failed(queue.as_ref(), id, &e).await;
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = sleep(config.sleep_interval) => {}
                    _ = changes.changed() => {}
                }
            }
            Err(e) => {
                error!("Pop failed on channel '{}': {}", config.channel, e);
                tokio::select! {
                    _ = sleep(config.sleep_interval) => {}
                    _ = changes.changed() => {}
                }
            }
        }

        let used = resident_memory_mb();
        if config.memory_limit_mb > 0 && used > config.memory_limit_mb {
            warn!(
                "Listener using {}MB (limit {}MB), draining and exiting",
                used, config.memory_limit_mb
            );
            let _ = control.send(ControlMessage::Drain);
            break;
        }
    }
    debug!("Poll loop for channel '{}' stopped", config.channel);
}

async fn dispatch(
    queue: &dyn Queue,
    registry: &JobRegistry,
    director: &WorkerDirector,
    id: u64,
) -> Result<()> {
    let message = queue.get(id).await?;
    let job = registry.resolve(&message)?;
    director.dispatch(id, job.as_ref()).await?;
    Ok(())
}

async fn mark_failed(queue: &dyn Queue, id: u64, error: &QueueError) {
    let attempts = queue.get(id).await.map(|m| m.attempts).unwrap_or(0);
    let recorded = match FailureDiagnostic::from_error(error, attempts).to_json() {
        Ok(diagnostic) => queue.failed(id, &diagnostic).await,
        Err(e) => Err(e),
    };
    if let Err(e) = recorded {
        error!("Could not mark job {} failed: {}", id, e);
    }
}
