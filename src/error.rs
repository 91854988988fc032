use crate::config::ConfigurationError;
use crate::state_machine::StateTrackerError;
use crate::store::StoreError;
use thiserror::Error;

/// Top-level error for pipeline bootstrap and operator-facing calls
///
/// Resilience call failures stay typed as
/// [`ResilienceError<E>`](crate::resilience::ResilienceError) so callers keep access to
/// their own operation error.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("State tracking error: {0}")]
    StateTracking(#[from] StateTrackerError),

    #[error("Background task failed: {0}")]
    BackgroundTask(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(error: sqlx::Error) -> Self {
        Self::Store(error.into())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(error: serde_json::Error) -> Self {
        Self::Store(error.into())
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::BackgroundTask(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
