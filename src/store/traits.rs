//! # Store Traits
//!
//! Typed repository interfaces for every piece of shared state the resilience and
//! state-tracking subsystems persist. Component logic only speaks these traits; key
//! layout, serialization and atomicity live in the backend implementations.

use super::errors::StoreResult;
use crate::models::EntityRecord;
use crate::resilience::circuit_breaker::{BreakerCommand, BreakerTransition, CircuitBreakerState};
use crate::resilience::metrics::{Alert, CallSample, ResilienceMetrics};
use crate::state_machine::{EntitySnapshot, EntityState, StateChangeEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::time::Duration;

/// Shared circuit breaker records, one per service
///
/// Records carry a monotonically increasing `version`, bumped by every write. Call
/// outcomes go through [`apply`](CircuitBreakerStore::apply), a single atomic
/// read-modify-write, so concurrent writers in different processes cannot lose each
/// other's counts. [`compare_and_set`](CircuitBreakerStore::compare_and_set) serves
/// transitions that exactly one writer may win.
#[async_trait]
pub trait CircuitBreakerStore: Send + Sync + Debug {
    /// Current record, `None` if the service has never been written (or its TTL lapsed)
    async fn load(&self, service: &str) -> StoreResult<Option<CircuitBreakerState>>;

    /// Write `next` only if the stored version equals `expected_version`
    ///
    /// A missing record has version 0. Returns `false` when another writer won.
    async fn compare_and_set(
        &self,
        service: &str,
        expected_version: u64,
        next: &CircuitBreakerState,
        ttl: Duration,
    ) -> StoreResult<bool>;

    /// Apply `command` to the stored record atomically and write the result
    ///
    /// A missing record starts from closed at version 0. A command that changes nothing
    /// writes nothing and returns an unchanged transition.
    async fn apply(
        &self,
        service: &str,
        command: &BreakerCommand,
        ttl: Duration,
    ) -> StoreResult<BreakerTransition>;

    /// Unconditionally force the record back to closed, bumping its version
    async fn reset(&self, service: &str, ttl: Duration) -> StoreResult<CircuitBreakerState>;
}

/// Sliding-window request log used by the rate limiter
///
/// `key` is the limiter's bare name; implementations apply the `rate_limit:` prefix.
#[async_trait]
pub trait RateLimitStore: Send + Sync + Debug {
    /// Prune entries older than `now - window` and count the survivors
    async fn count_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<u32>;

    /// Append a request at `now`; the log expires after `window` of inactivity
    async fn record(&self, key: &str, window: Duration, now: DateTime<Utc>) -> StoreResult<()>;

    /// Timestamp of the oldest request still inside the window
    async fn oldest_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// Atomic prune + count + insert; `true` if the request was admitted and recorded
    async fn try_record(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;
}

/// Append-only state change log, current-state projection and entity snapshots
#[async_trait]
pub trait StateEventStore: Send + Sync + Debug {
    /// Store the event (keyed by id, `ttl`) and push it onto the entity's bounded history
    async fn append_event(
        &self,
        event: &StateChangeEvent,
        history_limit: usize,
        ttl: Duration,
    ) -> StoreResult<()>;

    /// Most recent first, at most `limit` events
    async fn history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StateChangeEvent>>;

    async fn set_current_state(
        &self,
        entity_type: &str,
        entity_id: &str,
        state: EntityState,
        ttl: Duration,
    ) -> StoreResult<()>;

    async fn current_state(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityState>>;

    async fn save_snapshot(&self, snapshot: &EntitySnapshot, ttl: Duration) -> StoreResult<()>;

    /// Most recent first
    async fn snapshots(&self, entity_type: &str, entity_id: &str)
        -> StoreResult<Vec<EntitySnapshot>>;
}

/// Rolling observability data consumed by the resilience monitor
#[async_trait]
pub trait MetricsStore: Send + Sync + Debug {
    /// Record one call outcome, pruning samples older than `retention`
    async fn record_call(&self, sample: &CallSample, retention: Duration) -> StoreResult<()>;

    /// Samples for `service` recorded at or after `since`, oldest first
    async fn calls_since(&self, service: &str, since: DateTime<Utc>)
        -> StoreResult<Vec<CallSample>>;

    /// Append a metrics snapshot, pruning snapshots older than `retention`
    async fn append_metrics_snapshot(
        &self,
        metrics: &ResilienceMetrics,
        retention: Duration,
    ) -> StoreResult<()>;

    /// Snapshots for `service` collected at or after `since`, oldest first
    async fn metrics_history(
        &self,
        service: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ResilienceMetrics>>;

    async fn save_alert(&self, alert: &Alert, ttl: Duration) -> StoreResult<()>;

    /// Unexpired alerts across all services, newest first
    async fn recent_alerts(&self, limit: usize) -> StoreResult<Vec<Alert>>;
}

/// Outcome of a conditional status write on the authoritative entity record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Updated,
    /// The stored status did not match the expected one
    Conflict { actual: EntityState },
    NotFound,
}

/// Authoritative persistent entity records (the `status` column is the source of truth)
#[async_trait]
pub trait EntityRepository: Send + Sync + Debug {
    async fn find(&self, entity_type: &str, entity_id: &str) -> StoreResult<Option<EntityRecord>>;

    async fn upsert(&self, record: &EntityRecord) -> StoreResult<()>;

    /// Set `status = next` (and `updated_at = now`) if the stored status equals `expected`
    ///
    /// `expected = None` writes unconditionally.
    async fn compare_and_set_status(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected: Option<EntityState>,
        next: EntityState,
        now: DateTime<Utc>,
    ) -> StoreResult<StatusUpdate>;

    async fn list_by_states(&self, states: &[EntityState]) -> StoreResult<Vec<EntityRecord>>;
}
