//! Periodic queue-depth handlers.
//!
//! The manager calls every registered handler with the channel's status on
//! each snapshot tick. Handlers are registered explicitly when the manager
//! is built.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::QueueStatus;
use crate::error::Result;

#[async_trait]
pub trait SnapshotHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, channel: &str, status: &QueueStatus) -> Result<()>;
}

/// Logs the status tuple.
#[derive(Debug, Default, Clone)]
pub struct SnapshotLogger;

#[async_trait]
impl SnapshotHandler for SnapshotLogger {
    fn name(&self) -> &str {
        "logger"
    }

    async fn handle(&self, channel: &str, status: &QueueStatus) -> Result<()> {
        info!(
            channel,
            waiting = status.waiting,
            reserved = status.reserved,
            delayed = status.delayed,
            done = status.done,
            failed = status.failed,
            total = status.total,
            "Queue snapshot"
        );
        Ok(())
    }
}

/// Warns when the waiting backlog is above a threshold.
#[derive(Debug, Clone)]
pub struct WaitingThresholdAlert {
    threshold: u64,
}

impl WaitingThresholdAlert {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn is_exceeded(&self, status: &QueueStatus) -> bool {
        status.waiting > self.threshold
    }
}

#[async_trait]
impl SnapshotHandler for WaitingThresholdAlert {
    fn name(&self) -> &str {
        "waiting-threshold"
    }

    async fn handle(&self, channel: &str, status: &QueueStatus) -> Result<()> {
        if self.is_exceeded(status) {
            warn!(
                channel,
                waiting = status.waiting,
                threshold = self.threshold,
                "Waiting jobs above threshold"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_alert() {
        let alert = WaitingThresholdAlert::new(100);
        let busy = QueueStatus::from_counts(150, 101, 0, 0, 0);
        let quiet = QueueStatus::from_counts(150, 100, 0, 0, 0);

        assert!(alert.is_exceeded(&busy));
        assert!(!alert.is_exceeded(&quiet));
        alert.handle("emails", &busy).await.unwrap();
        SnapshotLogger.handle("emails", &quiet).await.unwrap();
    }
}
