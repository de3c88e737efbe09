//! Lifecycle state of the worker process we are running in.
//!
//! Signals, the memory ceiling and the loops themselves all talk to one
//! [`WorkerControl`]. Loops check [`WorkerControl::is_working`] before
//! taking the next id and `select!` on [`WorkerControl::terminated`] while a
//! job is in flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{WorkerSignal, WorkerStatus};

/// Exit code of a worker whose loop ended on an error. Anything but 1 is
/// respawned by the supervisor.
pub const WORKER_ERROR_EXIT: u8 = 2;

#[derive(Debug, Clone)]
pub struct WorkerControl {
    status: Arc<watch::Sender<WorkerStatus>>,
    restart: Arc<AtomicBool>,
}

impl Default for WorkerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerControl {
    pub fn new() -> Self {
        let (status, _) = watch::channel(WorkerStatus::Running);
        Self {
            status: Arc::new(status),
            restart: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    /// Still accepting new ids
    pub fn is_working(&self) -> bool {
        matches!(self.status(), WorkerStatus::Starting | WorkerStatus::Running)
    }

    /// Stop taking ids and exit once the current job is done.
    pub fn drain(&self, restart: bool) {
        if restart {
            self.restart.store(true, Ordering::SeqCst);
        }
        self.status.send_if_modified(|status| match status {
            WorkerStatus::Starting | WorkerStatus::Running => {
                *status = WorkerStatus::Draining;
                true
            }
            _ => false,
        });
    }

    /// Abandon in-flight work.
    pub fn terminate(&self) {
        self.status.send_if_modified(|status| {
            let changed = *status != WorkerStatus::Stopped;
            *status = WorkerStatus::Stopped;
            changed
        });
    }

    pub fn apply(&self, signal: WorkerSignal) {
        debug!("Worker {} received {:?}", std::process::id(), signal);
        match signal {
            WorkerSignal::Reload => self.drain(true),
            WorkerSignal::Drain => self.drain(false),
            WorkerSignal::Terminate | WorkerSignal::Kill => self.terminate(),
        }
    }

    /// Resolves once [`terminate`](Self::terminate) has been called.
    pub async fn terminated(&self) {
        let mut rx = self.status.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here.
        let _ = rx.wait_for(|status| *status == WorkerStatus::Stopped).await;
    }

    /// 0 asks the supervisor for a replacement, 1 does not.
    /// A worker that ends on an error exits with [`WORKER_ERROR_EXIT`].
    pub fn exit_code(&self) -> i32 {
        if self.restart.load(Ordering::SeqCst) { 0 } else { 1 }
    }

    /// Translate SIGUSR1, SIGUSR2 and SIGTERM into control calls for the
    /// rest of the process lifetime.
    pub fn listen_for_signals(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut reload = signal(SignalKind::user_defined1())?;
        let mut drain = signal(SignalKind::user_defined2())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let control = self.clone();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = reload.recv() => WorkerSignal::Reload,
                    Some(()) = drain.recv() => WorkerSignal::Drain,
                    Some(()) = terminate.recv() => WorkerSignal::Terminate,
                    else => break,
                };
                info!("Worker {} handling {:?}", std::process::id(), received);
                control.apply(received);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reload_drains_and_asks_for_restart() {
        let control = WorkerControl::new();
        control.apply(WorkerSignal::Reload);

        assert!(!control.is_working());
        assert_eq!(control.status(), WorkerStatus::Draining);
        assert_eq!(control.exit_code(), 0);
    }

    #[test]
    fn test_drain_exits_for_good() {
        let control = WorkerControl::new();
        control.apply(WorkerSignal::Drain);

        assert_eq!(control.status(), WorkerStatus::Draining);
        assert_eq!(control.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_terminated_resolves_after_terminate() {
        let control = WorkerControl::new();
        let waiter = control.clone();
        let handle = tokio::spawn(async move { waiter.terminated().await });

        control.apply(WorkerSignal::Terminate);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(control.status(), WorkerStatus::Stopped);
    }
}
