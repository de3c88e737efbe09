use crate::error::QueueError;
use thiserror::Error;

/// Errors raised by queue backends while talking to the store
#[derive(Error, Debug)]
pub enum StorageError {
    /// Connection-related errors (network, authentication, dropped sockets)
    #[error("Storage connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Payload or reply could not be converted
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Storage operation timed out
    #[error("Storage operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// No pooled connection was released in time
    #[error("Connection pool exhausted after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// Script or command failed
    #[error("Storage operation failed: {operation} - {message}")]
    OperationFailed {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// Create a connection error with a message
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with a message and source error
    pub fn connection_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a serialization error with a message and source error
    pub fn serialization_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn pool_exhausted(waited_ms: u64) -> Self {
        Self::PoolExhausted { waited_ms }
    }

    /// Create an operation failed error with source
    pub fn operation_failed_with_source<S: Into<String>, T: Into<String>>(
        operation: S,
        message: T,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            message: message.into(),
            source: Some(source),
        }
    }
}

#[cfg(feature = "redis")]
impl StorageError {
    /// Classify a redis error as connectivity or command failure.
    pub fn from_redis(operation: &str, err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::connection_with_source(format!("{} lost its connection", operation), Box::new(err))
        } else {
            let message = err.to_string();
            Self::operation_failed_with_source(operation, message, Box::new(err))
        }
    }
}

// Storage failures surface through the crate-wide error type
impl From<StorageError> for QueueError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection { .. } => QueueError::Connector {
                message: err.to_string(),
            },
            StorageError::PoolExhausted { waited_ms } => QueueError::PoolExhausted { waited_ms },
            StorageError::Serialization { message, .. } => QueueError::Serialization { message },
            StorageError::Timeout { timeout_ms } => QueueError::Timeout {
                operation: format!("storage command after {}ms", timeout_ms),
            },
            _ => QueueError::Storage {
                message: err.to_string(),
            },
        }
    }
}
