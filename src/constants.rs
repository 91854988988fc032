//! # System Constants
//!
//! Storage key layout, retention windows and recovery policy constants shared by the
//! resilience and state-tracking subsystems.

use std::time::Duration;

/// Logical key layout of the shared store
///
/// Every backend that persists shared state uses these prefixes so that operators can
/// inspect one service's or one entity's state without knowing which component wrote it.
pub mod keys {
    pub const CIRCUIT_BREAKER: &str = "circuit_breaker";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const STATE_CHANGE: &str = "state_change";
    pub const STATE_HISTORY: &str = "state_history";
    pub const CURRENT_STATE: &str = "current_state";
    pub const SNAPSHOT: &str = "entity_snapshot";
    pub const METRICS_HISTORY: &str = "metrics_history";
    pub const CALL_SAMPLES: &str = "call_samples";
    pub const ALERT: &str = "alert";
    pub const ALERT_INDEX: &str = "alert_index";

    pub fn circuit_breaker(service: &str) -> String {
        format!("{CIRCUIT_BREAKER}:{service}")
    }

    pub fn rate_limit(name: &str) -> String {
        format!("{RATE_LIMIT}:{name}")
    }

    pub fn state_change(event_id: &uuid::Uuid) -> String {
        format!("{STATE_CHANGE}:{event_id}")
    }

    pub fn state_history(entity_type: &str, entity_id: &str) -> String {
        format!("{STATE_HISTORY}:{entity_type}:{entity_id}")
    }

    pub fn current_state(entity_type: &str, entity_id: &str) -> String {
        format!("{CURRENT_STATE}:{entity_type}:{entity_id}")
    }

    pub fn snapshot(entity_type: &str, entity_id: &str) -> String {
        format!("{SNAPSHOT}:{entity_type}:{entity_id}")
    }

    pub fn metrics_history(service: &str) -> String {
        format!("{METRICS_HISTORY}:{service}")
    }

    pub fn call_samples(service: &str) -> String {
        format!("{CALL_SAMPLES}:{service}")
    }

    pub fn alert(service: &str, timestamp_millis: i64) -> String {
        format!("{ALERT}:{service}:{timestamp_millis}")
    }
}

/// Retention and TTL defaults
pub mod retention {
    use super::Duration;

    /// Circuit breaker records are refreshed on every write
    pub const CIRCUIT_STATE_TTL: Duration = Duration::from_secs(60 * 60);
    pub const STATE_EVENT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
    pub const STATE_HISTORY_LIMIT: usize = 100;
    pub const METRICS_HISTORY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
    pub const ALERT_TTL: Duration = Duration::from_secs(60 * 60);
    pub const CALL_SAMPLE_WINDOW: Duration = Duration::from_secs(60 * 60);
    /// Snapshots kept per entity
    pub const SNAPSHOT_LIMIT: usize = 20;
}

/// Rate limiter fallback behaviour
pub mod rate_limiting {
    use super::Duration;

    /// Wait applied when the backing store cannot be consulted
    pub const DEGRADED_WAIT: Duration = Duration::from_secs(1);
    /// Padding added to the computed wait so the oldest entry has certainly expired
    pub const WAIT_PADDING: Duration = Duration::from_secs(1);
}

/// Maximum optimistic-write attempts before a breaker mutation gives up
pub const MAX_CAS_ATTEMPTS: usize = 5;

/// Stuck-state thresholds (policy constants, overridable through configuration)
pub mod stuck_thresholds {
    use super::Duration;

    pub const COLLECTING: Duration = Duration::from_secs(60 * 60);
    pub const PROCESSING: Duration = Duration::from_secs(2 * 60 * 60);
    pub const PUBLISHING: Duration = Duration::from_secs(30 * 60);
}
