//! # Resilience Configuration
//!
//! Per-service circuit breaker + bulkhead settings and token-bucket rate limits.
//!
//! Durations are expressed in (fractional) seconds so the same struct deserializes
//! straight from `pipeline.toml`; accessors convert to `Duration`.

use super::service::ServiceIdentity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circuit breaker and bulkhead configuration for one external service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceResilienceConfig {
    /// Consecutive failures (while closed) that open the circuit
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call is allowed
    pub recovery_timeout_seconds: f64,

    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,

    /// Hard per-call timeout; exceeding it counts as a failure
    pub call_timeout_seconds: f64,

    /// Concurrent calls admitted by the bulkhead
    pub max_concurrent: u32,

    /// Callers allowed to wait for a bulkhead slot
    pub queue_capacity: u32,
}

impl ServiceResilienceConfig {
    /// Tuned defaults per upstream service
    ///
    /// Less reliable upstreams (Reddit, Ghost) trip sooner and cool down longer.
    pub fn for_service(service: ServiceIdentity) -> Self {
        match service {
            ServiceIdentity::Reddit => Self {
                failure_threshold: 3,
                recovery_timeout_seconds: 120.0,
                success_threshold: 2,
                call_timeout_seconds: 30.0,
                max_concurrent: 5,
                queue_capacity: 20,
            },
            ServiceIdentity::OpenAi => Self {
                failure_threshold: 5,
                recovery_timeout_seconds: 60.0,
                success_threshold: 3,
                call_timeout_seconds: 60.0,
                max_concurrent: 10,
                queue_capacity: 50,
            },
            ServiceIdentity::Ghost => Self {
                failure_threshold: 3,
                recovery_timeout_seconds: 300.0,
                success_threshold: 2,
                call_timeout_seconds: 30.0,
                max_concurrent: 3,
                queue_capacity: 10,
            },
            ServiceIdentity::Database => Self {
                failure_threshold: 5,
                recovery_timeout_seconds: 30.0,
                success_threshold: 2,
                call_timeout_seconds: 10.0,
                max_concurrent: 20,
                queue_capacity: 100,
            },
            ServiceIdentity::Redis => Self {
                failure_threshold: 5,
                recovery_timeout_seconds: 30.0,
                success_threshold: 2,
                call_timeout_seconds: 5.0,
                max_concurrent: 50,
                queue_capacity: 200,
            },
            ServiceIdentity::Vault => Self {
                failure_threshold: 3,
                recovery_timeout_seconds: 60.0,
                success_threshold: 2,
                call_timeout_seconds: 10.0,
                max_concurrent: 5,
                queue_capacity: 20,
            },
        }
    }

    pub fn recovery_timeout(&self) -> Duration {
        seconds(self.recovery_timeout_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        seconds(self.call_timeout_seconds)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if !self.recovery_timeout_seconds.is_finite() || self.recovery_timeout_seconds <= 0.0 {
            return Err("recovery_timeout_seconds must be greater than 0".to_string());
        }

        if self.recovery_timeout_seconds > 3600.0 {
            return Err("recovery_timeout_seconds should not exceed 3600".to_string());
        }

        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }

        if self.success_threshold > 50 {
            return Err("success_threshold should not exceed 50".to_string());
        }

        if !self.call_timeout_seconds.is_finite() || self.call_timeout_seconds <= 0.0 {
            return Err("call_timeout_seconds must be greater than 0".to_string());
        }

        if self.call_timeout_seconds > 3600.0 {
            return Err("call_timeout_seconds should not exceed 3600".to_string());
        }

        if self.max_concurrent == 0 {
            return Err("max_concurrent must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for ServiceResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60.0,
            success_threshold: 2,
            call_timeout_seconds: 30.0,
            max_concurrent: 10,
            queue_capacity: 50,
        }
    }
}

/// Token-bucket style sliding window limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("max_requests must be greater than 0".to_string());
        }

        if self.window_seconds == 0 {
            return Err("window_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for RateLimitConfig {
    /// Reddit API allowance: 60 requests per minute
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_seconds: 60,
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
