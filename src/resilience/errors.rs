use super::service::ServiceIdentity;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the resilience wrappers around an outbound call
///
/// `E` is the wrapped operation's own error type; everything else is raised by the
/// breaker, bulkhead or timeout before (or instead of) the operation's result.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The breaker is open; the call was not attempted
    #[error("Circuit breaker is open for {service}")]
    CircuitOpen { service: ServiceIdentity },

    /// No concurrency slot and no queue room; the call was not attempted
    #[error("Bulkhead full for {service}: {active} active, {queued} queued")]
    BulkheadFull {
        service: ServiceIdentity,
        active: u32,
        queued: u32,
    },

    /// The call exceeded its hard timeout and was counted as a breaker failure
    #[error("Call to {service} timed out after {timeout:?}")]
    Timeout {
        service: ServiceIdentity,
        timeout: Duration,
    },

    /// The operation ran and returned its own error
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

impl<E> ResilienceError<E> {
    /// Whether retrying after a backoff is reasonable
    ///
    /// An open circuit is not retryable at this layer; higher-level backoff decides.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BulkheadFull { .. } | Self::Timeout { .. })
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether the wrapped operation was actually invoked
    pub fn was_attempted(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::OperationFailed(_))
    }

    /// The operation's own error, if that is what this is
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed(error) => Some(error),
            _ => None,
        }
    }

    pub fn map_operation_error<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::CircuitOpen { service } => ResilienceError::CircuitOpen { service },
            Self::BulkheadFull {
                service,
                active,
                queued,
            } => ResilienceError::BulkheadFull {
                service,
                active,
                queued,
            },
            Self::Timeout { service, timeout } => ResilienceError::Timeout { service, timeout },
            Self::OperationFailed(error) => ResilienceError::OperationFailed(f(error)),
        }
    }
}

/// Bulkhead admission rejection (queue at capacity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Bulkhead full for {service}: {active} active, {queued} queued")]
pub struct BulkheadFull {
    pub service: ServiceIdentity,
    pub active: u32,
    pub queued: u32,
}

impl<E> From<BulkheadFull> for ResilienceError<E> {
    fn from(rejection: BulkheadFull) -> Self {
        ResilienceError::BulkheadFull {
            service: rejection.service,
            active: rejection.active,
            queued: rejection.queued,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        let open: ResilienceError<String> = ResilienceError::CircuitOpen {
            service: ServiceIdentity::Reddit,
        };
        assert!(!open.is_retryable());
        assert!(open.is_circuit_open());
        assert!(!open.was_attempted());

        let full: ResilienceError<String> = BulkheadFull {
            service: ServiceIdentity::Ghost,
            active: 3,
            queued: 10,
        }
        .into();
        assert!(full.is_retryable());
        assert_eq!(
            full.to_string(),
            "Bulkhead full for ghost: 3 active, 10 queued"
        );

        let timeout: ResilienceError<String> = ResilienceError::Timeout {
            service: ServiceIdentity::OpenAi,
            timeout: Duration::from_secs(60),
        };
        assert!(timeout.is_retryable());
        assert!(timeout.was_attempted());
    }

    #[test]
    fn test_operation_error_accessors() {
        let failed: ResilienceError<String> = ResilienceError::OperationFailed("boom".to_string());
        assert_eq!(failed.to_string(), "Operation failed: boom");

        let mapped = failed.map_operation_error(|e| e.len());
        assert_eq!(mapped.into_operation_error(), Some(4));
    }
}
