#![allow(dead_code)]

use aint_queue::processing::{WorkerKind, WorkerStrategy};
use aint_queue::serializer::JobRegistry;
use aint_queue::{JobCapability, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process strategy that only records what the director hands it.
#[derive(Debug)]
pub struct RecordingStrategy {
    kind: WorkerKind,
    wait_delay: Duration,
    running: AtomicBool,
    pub received: Mutex<Vec<u64>>,
    pub starts: AtomicUsize,
    pub waits: AtomicUsize,
    pub stops: AtomicUsize,
    pub rebalances: AtomicUsize,
}

impl RecordingStrategy {
    pub fn new(kind: WorkerKind) -> Arc<Self> {
        Self::with_wait_delay(kind, Duration::ZERO)
    }

    /// Strategy whose workers take `wait_delay` to drain.
    pub fn with_wait_delay(kind: WorkerKind, wait_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            wait_delay,
            running: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            rebalances: AtomicUsize::new(0),
        })
    }

    pub fn received(&self) -> Vec<u64> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerStrategy for RecordingStrategy {
    fn kind(&self) -> WorkerKind {
        self.kind
    }

    async fn start(&self) -> Result<Vec<u32>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(vec![std::process::id()])
    }

    async fn stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.wait_delay).await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn receive(&self, id: u64) -> Result<()> {
        self.received.lock().unwrap().push(id);
        Ok(())
    }

    async fn rebalance(&self) -> Result<()> {
        self.rebalances.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry with one no-op callable per capability.
pub fn registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry
        .register_callable("sync_job", JobCapability::Sync, |_| async { Ok(()) })
        .register_callable("pool_job", JobCapability::AsyncProcess, |_| async { Ok(()) })
        .register_callable("light_job", JobCapability::CoroutineSafe, |_| async { Ok(()) });
    registry
}
