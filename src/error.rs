//! Error types for aint-queue.
//!
//! Every fallible operation in the crate returns [`QueueError`]. The variants
//! follow the lifecycle of a job: payload problems are [`QueueError::InvalidJob`],
//! job body failures are classified as retryable or terminal by the executor,
//! and store connectivity surfaces as [`QueueError::Connector`] or
//! [`QueueError::PoolExhausted`].

use thiserror::Error;

/// The main error type for queue operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    /// Payload is missing, malformed, or names an unknown job type.
    #[error("Invalid job {id}: {message}")]
    InvalidJob { id: u64, message: String },

    /// Job body failed and the job asked to be retried.
    #[error("Job {id} failed on attempt {attempts} and will be retried: {message}")]
    RetryableExecution {
        id: u64,
        attempts: u32,
        message: String,
    },

    /// Job body failed and will not be retried.
    #[error("Job {id} failed permanently after {attempts} attempts: {message}")]
    TerminalExecution {
        id: u64,
        attempts: u32,
        message: String,
    },

    /// No pooled connection became available in time.
    #[error("Connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// The store could not be reached or dropped the connection.
    #[error("Connector error: {message}")]
    Connector { message: String },

    /// Another listener already owns the channel.
    #[error("Listener for channel '{channel}' is already running with pid {pid}")]
    AlreadyRunning { channel: String, pid: u32 },

    /// Coroutine worker is at its task cap.
    #[error("Concurrency limit of {limit} tasks exceeded")]
    ConcurrencyExceeded { limit: usize },

    /// Serialization/deserialization errors
    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    /// Storage-related errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Process or filesystem errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl QueueError {
    pub fn invalid_job<S: Into<String>>(id: u64, message: S) -> Self {
        Self::InvalidJob {
            id,
            message: message.into(),
        }
    }

    pub fn connector<S: Into<String>>(message: S) -> Self {
        Self::Connector {
            message: message.into(),
        }
    }

    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Whether the error came from store connectivity rather than job data.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            QueueError::Connector { .. } | QueueError::PoolExhausted { .. }
        )
    }

    /// Whether retrying the same store call later may succeed: connectivity,
    /// command timeouts and store-side failures.
    pub fn is_transient(&self) -> bool {
        self.is_connectivity()
            || matches!(
                self,
                QueueError::Timeout { .. } | QueueError::Storage { .. }
            )
    }

    /// Short label written into failure diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::InvalidJob { .. } => "InvalidJobError",
            QueueError::RetryableExecution { .. } => "RetryableExecutionError",
            QueueError::TerminalExecution { .. } => "TerminalExecutionError",
            QueueError::PoolExhausted { .. } => "PoolExhaustedError",
            QueueError::Connector { .. } => "ConnectorError",
            QueueError::AlreadyRunning { .. } => "AlreadyRunningError",
            QueueError::ConcurrencyExceeded { .. } => "ConcurrencyExceededError",
            QueueError::Serialization { .. } => "SerializationError",
            QueueError::Storage { .. } => "StorageError",
            QueueError::Configuration { .. } => "ConfigurationError",
            QueueError::Timeout { .. } => "TimeoutError",
            QueueError::Io { .. } => "IoError",
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::Io {
            message: err.to_string(),
        }
    }
}

/// A specialized Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(QueueError::connector("refused").is_connectivity());
        assert!(QueueError::PoolExhausted { waited_ms: 3000 }.is_connectivity());
        assert!(!QueueError::invalid_job(1, "bad tag").is_connectivity());
    }

    #[test]
    fn test_transient_classification() {
        assert!(QueueError::connector("refused").is_transient());
        assert!(QueueError::from(crate::storage::StorageError::timeout(5000)).is_transient());
        assert!(QueueError::storage("BUSY script running").is_transient());
        assert!(!QueueError::invalid_job(1, "bad tag").is_transient());
        assert!(!QueueError::configuration("no strategy").is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = QueueError::AlreadyRunning {
            channel: "emails".to_string(),
            pid: 4242,
        };
        let text = err.to_string();
        assert!(text.contains("emails"));
        assert!(text.contains("4242"));
        assert_eq!(err.kind(), "AlreadyRunningError");
    }
}
