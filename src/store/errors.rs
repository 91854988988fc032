//! Store error types

use thiserror::Error;

/// Errors raised by shared-state and repository backends
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Failed to connect to the backing store
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Failed to serialize or deserialize a stored value
    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// The backend rejected or failed the operation
    #[error("Store backend error: {0}")]
    Backend(String),

    /// A record the operation depends on does not exist
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(error.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(error: redis::RedisError) -> Self {
        if error.is_connection_refusal() || error.is_io_error() || error.is_timeout() {
            StoreError::Connection(error.to_string())
        } else {
            StoreError::Backend(error.to_string())
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
