//! # Resilience Metrics
//!
//! Per-process call counters kept by each circuit breaker, the call samples the manager
//! writes to the shared metrics store, and the snapshot/alert records the monitor
//! derives from them.

use super::circuit_breaker::CircuitState;
use super::service::ServiceIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Lock-free call counters for one breaker
///
/// Updated on every call without taking a lock; read as a consistent-enough snapshot
/// for status reporting.
#[derive(Debug, Default)]
pub(crate) struct CallCounters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    timeout_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl CallCounters {
    #[inline]
    pub(crate) fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.add_duration(duration);
    }

    #[inline]
    pub(crate) fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.add_duration(duration);
    }

    #[inline]
    pub(crate) fn record_timeout(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.timeout_count.fetch_add(1, Ordering::Relaxed);
        self.add_duration(duration);
    }

    /// Calls refused before reaching the operation (open circuit)
    #[inline]
    pub(crate) fn record_rejected(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn add_duration(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_duration_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CallStatistics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let timeout_count = self.timeout_count.load(Ordering::Relaxed);
        let total_nanos = self.total_duration_nanos.load(Ordering::Relaxed);
        let total_duration = Duration::from_nanos(total_nanos);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                (failure_count + timeout_count) as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CallStatistics {
            total_calls,
            success_count,
            failure_count,
            timeout_count,
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            total_duration,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

/// Point-in-time view of a breaker's per-process call counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatistics {
    /// Calls that reached the operation
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    /// Calls refused by an open circuit
    pub rejected_count: u64,
    pub total_duration: Duration,
    /// Failures plus timeouts over attempted calls (0.0 to 1.0)
    pub failure_rate: f64,
    pub success_rate: f64,
    pub average_duration: Duration,
}

/// How one wrapped call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// Refused by the breaker or bulkhead; the operation never ran
    Rejected,
}

impl CallOutcome {
    pub fn was_attempted(&self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Timeout)
    }
}

/// One call outcome, kept in the rolling per-service sample store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSample {
    pub id: Uuid,
    pub service: ServiceIdentity,
    pub operation: String,
    pub outcome: CallOutcome,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl CallSample {
    pub fn new(
        service: ServiceIdentity,
        operation: impl Into<String>,
        outcome: CallOutcome,
        duration: Duration,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            service,
            operation: operation.into(),
            outcome,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            recorded_at,
        }
    }
}

/// Aggregated view of one service over the monitor's trailing window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceMetrics {
    pub service: ServiceIdentity,
    pub collected_at: DateTime<Utc>,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub active_calls: u32,
    pub queued_calls: u32,
    pub available_slots: u32,
    pub queue_utilization: f64,
    /// Attempted calls in the window (rejections excluded)
    pub window_calls: u64,
    pub window_failures: u64,
    pub window_rejections: u64,
    pub failure_rate: f64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
}

impl ResilienceMetrics {
    /// Compute window rates from raw samples
    ///
    /// Rates stay at zero until `min_samples` attempted calls have been seen.
    pub(crate) fn window_rates(samples: &[CallSample], min_samples: u64) -> WindowRates {
        let attempted: Vec<&CallSample> = samples.iter().filter(|s| s.outcome.was_attempted()).collect();
        let window_calls = attempted.len() as u64;
        let window_failures = attempted.iter().filter(|s| s.outcome.is_failure()).count() as u64;
        let window_rejections = samples.len() as u64 - window_calls;

        if window_calls == 0 || window_calls < min_samples {
            return WindowRates {
                window_calls,
                window_failures,
                window_rejections,
                ..WindowRates::default()
            };
        }

        let total_ms: u64 = attempted.iter().map(|s| s.duration_ms).sum();
        let failure_rate = window_failures as f64 / window_calls as f64;

        WindowRates {
            window_calls,
            window_failures,
            window_rejections,
            failure_rate,
            success_rate: 1.0 - failure_rate,
            avg_response_time_ms: total_ms as f64 / window_calls as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct WindowRates {
    pub window_calls: u64,
    pub window_failures: u64,
    pub window_rejections: u64,
    pub failure_rate: f64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
}

/// Alert conditions evaluated every monitor cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CircuitOpen,
    CircuitHalfOpen,
    BulkheadSaturation,
    HighFailureRate,
    SlowResponses,
}

impl AlertKind {
    pub fn severity(&self) -> AlertSeverity {
        match self {
            Self::CircuitOpen | Self::HighFailureRate => AlertSeverity::Critical,
            Self::CircuitHalfOpen | Self::BulkheadSaturation | Self::SlowResponses => {
                AlertSeverity::Warning
            }
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CircuitOpen => "circuit_open",
            Self::CircuitHalfOpen => "circuit_half_open",
            Self::BulkheadSaturation => "bulkhead_saturation",
            Self::HighFailureRate => "high_failure_rate",
            Self::SlowResponses => "slow_responses",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub service: ServiceIdentity,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    /// Observed value that tripped the condition
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
}
