//! In-memory store backends
//!
//! Used by unit and integration tests and by single-process deployments. TTLs are
//! enforced lazily against the injected clock, so tests can expire records by advancing
//! a [`ManualClock`](crate::clock::ManualClock). Failure injection switches make the
//! degraded paths of the components testable.

use super::errors::{StoreError, StoreResult};
use super::traits::{
    CircuitBreakerStore, EntityRepository, MetricsStore, RateLimitStore, StateEventStore,
    StatusUpdate,
};
use crate::clock::{to_chrono, SharedClock};
use crate::constants::{keys, retention};
use crate::models::{entity_key, EntityRecord};
use crate::resilience::circuit_breaker::{BreakerCommand, BreakerTransition, CircuitBreakerState};
use crate::resilience::metrics::{Alert, CallSample, ResilienceMetrics};
use crate::state_machine::{EntitySnapshot, EntityState, StateChangeEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn new(value: T, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now + to_chrono(ttl),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Shared-state store held in process memory
#[derive(Debug)]
pub struct InMemoryStore {
    clock: SharedClock,
    circuit_breakers: DashMap<String, Expiring<CircuitBreakerState>>,
    /// Request timestamps per limiter key, oldest first
    rate_limits: Mutex<HashMap<String, Expiring<VecDeque<DateTime<Utc>>>>>,
    events: DashMap<Uuid, Expiring<StateChangeEvent>>,
    /// Event ids per entity, newest first
    histories: DashMap<String, Expiring<VecDeque<Uuid>>>,
    current_states: DashMap<String, Expiring<EntityState>>,
    snapshots: DashMap<String, Vec<Expiring<EntitySnapshot>>>,
    call_samples: DashMap<String, Vec<CallSample>>,
    metrics_history: DashMap<String, Vec<ResilienceMetrics>>,
    alerts: Mutex<Vec<Expiring<Alert>>>,
    unavailable: AtomicBool,
    fail_event_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            circuit_breakers: DashMap::new(),
            rate_limits: Mutex::new(HashMap::new()),
            events: DashMap::new(),
            histories: DashMap::new(),
            current_states: DashMap::new(),
            snapshots: DashMap::new(),
            call_samples: DashMap::new(),
            metrics_history: DashMap::new(),
            alerts: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            fail_event_writes: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only event-log appends fail (projection and snapshots keep working)
    pub fn set_event_log_failure(&self, failing: bool) {
        self.fail_event_writes.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl CircuitBreakerStore for InMemoryStore {
    async fn load(&self, service: &str) -> StoreResult<Option<CircuitBreakerState>> {
        self.check_available()?;
        let now = self.now();
        let key = keys::circuit_breaker(service);

        let record = self
            .circuit_breakers
            .get(&key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone());
        Ok(record)
    }

    async fn compare_and_set(
        &self,
        service: &str,
        expected_version: u64,
        next: &CircuitBreakerState,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.check_available()?;
        let now = self.now();
        let key = keys::circuit_breaker(service);

        let mut entry = self
            .circuit_breakers
            .entry(key)
            .or_insert_with(|| Expiring::new(CircuitBreakerState::closed(), now, Duration::ZERO));

        let current_version = if entry.is_live(now) {
            entry.value.version
        } else {
            0
        };
        if current_version != expected_version {
            return Ok(false);
        }

        *entry = Expiring::new(next.clone(), now, ttl);
        Ok(true)
    }

    async fn apply(
        &self,
        service: &str,
        command: &BreakerCommand,
        ttl: Duration,
    ) -> StoreResult<BreakerTransition> {
        self.check_available()?;
        let now = self.now();
        let key = keys::circuit_breaker(service);

        // The entry guard holds the shard lock for the whole read-modify-write
        let mut entry = self
            .circuit_breakers
            .entry(key)
            .or_insert_with(|| Expiring::new(CircuitBreakerState::closed(), now, Duration::ZERO));

        let previous = if entry.is_live(now) {
            entry.value.clone()
        } else {
            CircuitBreakerState::closed()
        };
        let Some(mut current) = command.apply(&previous) else {
            return Ok(BreakerTransition::unchanged(previous));
        };
        current.version = previous.version + 1;

        *entry = Expiring::new(current.clone(), now, ttl);
        Ok(BreakerTransition { previous, current })
    }

    async fn reset(&self, service: &str, ttl: Duration) -> StoreResult<CircuitBreakerState> {
        self.check_available()?;
        let now = self.now();
        let key = keys::circuit_breaker(service);

        let mut entry = self
            .circuit_breakers
            .entry(key)
            .or_insert_with(|| Expiring::new(CircuitBreakerState::closed(), now, Duration::ZERO));

        let version = if entry.is_live(now) {
            entry.value.version + 1
        } else {
            1
        };
        let record = CircuitBreakerState {
            version,
            ..CircuitBreakerState::closed()
        };
        *entry = Expiring::new(record.clone(), now, ttl);
        Ok(record)
    }
}

fn prune_window(log: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    let cutoff = now - to_chrono(window);
    while log.front().is_some_and(|oldest| *oldest <= cutoff) {
        log.pop_front();
    }
}

impl InMemoryStore {
    /// Request log keys currently held, sorted
    #[cfg(test)]
    pub(crate) fn rate_limit_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.rate_limits.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Run `f` on the live (pruned) request log for limiter `key`
    fn with_request_log<R>(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Expiring<VecDeque<DateTime<Utc>>>) -> R,
    ) -> R {
        let mut logs = self.rate_limits.lock();
        let entry = logs
            .entry(keys::rate_limit(key))
            .or_insert_with(|| Expiring::new(VecDeque::new(), now, window));
        if !entry.is_live(now) {
            entry.value.clear();
        }
        prune_window(&mut entry.value, window, now);
        f(entry)
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn count_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<u32> {
        self.check_available()?;
        Ok(self.with_request_log(key, window, now, |log| log.value.len() as u32))
    }

    async fn record(&self, key: &str, window: Duration, now: DateTime<Utc>) -> StoreResult<()> {
        self.check_available()?;
        self.with_request_log(key, window, now, |log| {
            log.value.push_back(now);
            log.expires_at = now + to_chrono(window);
        });
        Ok(())
    }

    async fn oldest_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.check_available()?;
        Ok(self.with_request_log(key, window, now, |log| log.value.front().copied()))
    }

    async fn try_record(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.with_request_log(key, window, now, |log| {
            if log.value.len() as u32 >= max_requests {
                return false;
            }
            log.value.push_back(now);
            log.expires_at = now + to_chrono(window);
            true
        }))
    }
}

#[async_trait]
impl StateEventStore for InMemoryStore {
    async fn append_event(
        &self,
        event: &StateChangeEvent,
        history_limit: usize,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.check_available()?;
        if self.fail_event_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("event log write rejected".to_string()));
        }

        let now = self.now();
        self.events
            .insert(event.id, Expiring::new(event.clone(), now, ttl));

        let key = keys::state_history(&event.entity_type, &event.entity_id);
        let mut history = self
            .histories
            .entry(key)
            .or_insert_with(|| Expiring::new(VecDeque::new(), now, ttl));
        if !history.is_live(now) {
            history.value.clear();
        }
        history.value.push_front(event.id);
        history.value.truncate(history_limit);
        history.expires_at = now + to_chrono(ttl);
        Ok(())
    }

    async fn history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<StateChangeEvent>> {
        self.check_available()?;
        let now = self.now();
        let key = keys::state_history(entity_type, entity_id);

        let ids: Vec<Uuid> = match self.histories.get(&key) {
            Some(history) if history.is_live(now) => history.value.iter().copied().collect(),
            _ => return Ok(Vec::new()),
        };

        let events = ids
            .iter()
            .filter_map(|id| {
                self.events
                    .get(id)
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| entry.value.clone())
            })
            .take(limit)
            .collect();
        Ok(events)
    }

    async fn set_current_state(
        &self,
        entity_type: &str,
        entity_id: &str,
        state: EntityState,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.check_available()?;
        self.current_states.insert(
            keys::current_state(entity_type, entity_id),
            Expiring::new(state, self.now(), ttl),
        );
        Ok(())
    }

    async fn current_state(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityState>> {
        self.check_available()?;
        let now = self.now();
        let state = self
            .current_states
            .get(&keys::current_state(entity_type, entity_id))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value);
        Ok(state)
    }

    async fn save_snapshot(&self, snapshot: &EntitySnapshot, ttl: Duration) -> StoreResult<()> {
        self.check_available()?;
        let now = self.now();
        let mut snapshots = self
            .snapshots
            .entry(keys::snapshot(&snapshot.entity_type, &snapshot.entity_id))
            .or_default();
        snapshots.retain(|entry| entry.is_live(now));
        snapshots.insert(0, Expiring::new(snapshot.clone(), now, ttl));
        snapshots.truncate(retention::SNAPSHOT_LIMIT);
        Ok(())
    }

    async fn snapshots(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StoreResult<Vec<EntitySnapshot>> {
        self.check_available()?;
        let now = self.now();
        let snapshots = self
            .snapshots
            .get(&keys::snapshot(entity_type, entity_id))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.is_live(now))
                    .map(|entry| entry.value.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(snapshots)
    }
}

#[async_trait]
impl MetricsStore for InMemoryStore {
    async fn record_call(&self, sample: &CallSample, retention: Duration) -> StoreResult<()> {
        self.check_available()?;
        let cutoff = sample.recorded_at - to_chrono(retention);
        let mut samples = self
            .call_samples
            .entry(keys::call_samples(sample.service.as_str()))
            .or_default();
        samples.retain(|existing| existing.recorded_at >= cutoff);
        samples.push(sample.clone());
        Ok(())
    }

    async fn calls_since(
        &self,
        service: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<CallSample>> {
        self.check_available()?;
        let samples = self
            .call_samples
            .get(&keys::call_samples(service))
            .map(|samples| {
                let mut selected: Vec<CallSample> = samples
                    .iter()
                    .filter(|sample| sample.recorded_at >= since)
                    .cloned()
                    .collect();
                selected.sort_by_key(|sample| sample.recorded_at);
                selected
            })
            .unwrap_or_default();
        Ok(samples)
    }

    async fn append_metrics_snapshot(
        &self,
        metrics: &ResilienceMetrics,
        retention: Duration,
    ) -> StoreResult<()> {
        self.check_available()?;
        let cutoff = metrics.collected_at - to_chrono(retention);
        let mut history = self
            .metrics_history
            .entry(keys::metrics_history(metrics.service.as_str()))
            .or_default();
        history.retain(|existing| existing.collected_at >= cutoff);
        history.push(metrics.clone());
        Ok(())
    }

    async fn metrics_history(
        &self,
        service: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ResilienceMetrics>> {
        self.check_available()?;
        let history = self
            .metrics_history
            .get(&keys::metrics_history(service))
            .map(|history| {
                history
                    .iter()
                    .filter(|metrics| metrics.collected_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(history)
    }

    async fn save_alert(&self, alert: &Alert, ttl: Duration) -> StoreResult<()> {
        self.check_available()?;
        let now = self.now();
        let mut alerts = self.alerts.lock();
        alerts.retain(|entry| entry.is_live(now));
        alerts.push(Expiring::new(alert.clone(), now, ttl));
        Ok(())
    }

    async fn recent_alerts(&self, limit: usize) -> StoreResult<Vec<Alert>> {
        self.check_available()?;
        let now = self.now();
        let alerts = self.alerts.lock();
        let mut live: Vec<Alert> = alerts
            .iter()
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
            .collect();
        live.sort_by(|a, b| b.raised_at.cmp(&a.raised_at));
        live.truncate(limit);
        Ok(live)
    }
}

/// Authoritative entity records held in process memory
#[derive(Debug, Default)]
pub struct InMemoryEntityRepository {
    records: DashMap<String, EntityRecord>,
    unavailable: AtomicBool,
}

impl InMemoryEntityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "in-memory entity repository marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityRepository for InMemoryEntityRepository {
    async fn find(&self, entity_type: &str, entity_id: &str) -> StoreResult<Option<EntityRecord>> {
        self.check_available()?;
        Ok(self
            .records
            .get(&entity_key(entity_type, entity_id))
            .map(|record| record.clone()))
    }

    async fn upsert(&self, record: &EntityRecord) -> StoreResult<()> {
        self.check_available()?;
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected: Option<EntityState>,
        next: EntityState,
        now: DateTime<Utc>,
    ) -> StoreResult<StatusUpdate> {
        self.check_available()?;
        let Some(mut record) = self.records.get_mut(&entity_key(entity_type, entity_id)) else {
            return Ok(StatusUpdate::NotFound);
        };

        if let Some(expected) = expected {
            if record.status != expected {
                return Ok(StatusUpdate::Conflict {
                    actual: record.status,
                });
            }
        }

        record.status = next;
        record.updated_at = now;
        Ok(StatusUpdate::Updated)
    }

    async fn list_by_states(&self, states: &[EntityState]) -> StoreResult<Vec<EntityRecord>> {
        self.check_available()?;
        let mut records: Vec<EntityRecord> = self
            .records
            .iter()
            .filter(|record| states.contains(&record.status))
            .map(|record| record.clone())
            .collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(records)
    }
}
