//! Derived job and queue state.
//!
//! No backend stores a status field. A job's status is inferred from which of
//! the channel's sets holds its id, and the channel status is a set of counts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QueueError, Result};
use crate::serializer::JobPayload;

/// Lifecycle position of a job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// In the waiting list with its body present
    Waiting,
    /// In the delayed set, scored by the time it becomes ready
    Delayed,
    /// Held by a worker
    Reserved,
    /// Absent from every set
    Done,
    /// In the dead-letter set
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Reserved => "reserved",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    /// Done and Failed only change through an explicit reload.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub waiting: u64,
    pub reserved: u64,
    pub delayed: u64,
    pub done: u64,
    pub failed: u64,
    /// Last id handed out by the allocator
    pub total: u64,
}

impl QueueStatus {
    /// Build a status from raw counts. `done` is whatever is left of `total`.
    pub fn from_counts(total: u64, waiting: u64, reserved: u64, delayed: u64, failed: u64) -> Self {
        Self {
            waiting,
            reserved,
            delayed,
            failed,
            total,
            done: total.saturating_sub(waiting + reserved + delayed + failed),
        }
    }

    /// Jobs not yet finished one way or the other.
    pub fn pending(&self) -> u64 {
        self.waiting + self.reserved + self.delayed
    }
}

/// Diagnostic blob stored in the failed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDiagnostic {
    pub last_error: String,
    pub last_error_message: String,
    pub attempts: u32,
}

impl FailureDiagnostic {
    pub fn new(last_error: impl Into<String>, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            last_error: last_error.into(),
            last_error_message: message.into(),
            attempts,
        }
    }

    pub fn from_error(error: &QueueError, attempts: u32) -> Self {
        Self::new(error.kind(), error.to_string(), attempts)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Entry in the dead-letter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    pub id: u64,
    /// Raw diagnostic as stored
    pub payload: String,
}

impl FailedJob {
    /// Parsed diagnostic, if the stored payload is one.
    pub fn diagnostic(&self) -> Option<FailureDiagnostic> {
        serde_json::from_str(&self.payload).ok()
    }
}

/// A job body as returned by `Queue::get`.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMessage {
    pub id: u64,
    pub attempts: u32,
    pub payload: JobPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_subtracts_failed() {
        let status = QueueStatus::from_counts(10, 2, 1, 3, 1);
        assert_eq!(status.done, 3);
        assert_eq!(status.pending(), 6);
    }

    #[test]
    fn test_done_never_underflows() {
        // Counts read across a concurrent push can briefly exceed total
        let status = QueueStatus::from_counts(1, 2, 0, 0, 0);
        assert_eq!(status.done, 0);
    }

    #[test]
    fn test_failed_job_diagnostic() {
        let diagnostic = FailureDiagnostic::new("NetworkError", "connection reset", 3);
        let failed = FailedJob {
            id: 7,
            payload: diagnostic.to_json().unwrap(),
        };
        assert_eq!(failed.diagnostic(), Some(diagnostic));

        let legacy = FailedJob {
            id: 8,
            payload: "plain text".to_string(),
        };
        assert!(legacy.diagnostic().is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Delayed.is_terminal());
    }
}
