//! # Circuit Breaker Implementation
//!
//! Per-service fault isolation with three states: Closed (normal operation), Open
//! (failing fast) and Half-Open (testing recovery).
//!
//! The breaker record lives in a shared [`CircuitBreakerStore`] so every worker
//! process sees one breaker per service. Outcomes (success, failure, forced open) are
//! sent to the store as a [`BreakerCommand`] applied in one atomic step, so concurrent
//! callers never lose a count. The open to half-open gate is an optimistic
//! compare-and-set so exactly one caller wins it. When the store cannot be reached the
//! breaker keeps working from its last known record (degraded mode) instead of failing
//! calls.

use super::config::ServiceResilienceConfig;
use super::errors::ResilienceError;
use super::metrics::{CallCounters, CallStatistics};
use super::service::ServiceIdentity;
use crate::clock::{elapsed_between, SharedClock};
use crate::constants::MAX_CAS_ATTEMPTS;
use crate::log_resilience;
use crate::store::{CircuitBreakerStore, StoreError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    #[default]
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - trial calls allowed through to test the service
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("Invalid circuit state: {other}")),
        }
    }
}

/// Shared breaker record for one service
///
/// `failure_count` is zero whenever the state is closed after a transition;
/// `success_count` only means something while half-open.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Optimistic concurrency token, bumped by every write
    pub version: u64,
}

impl CircuitBreakerState {
    /// A fresh closed record (version 0, i.e. not yet persisted)
    pub fn closed() -> Self {
        Self::default()
    }

    /// Whether an open circuit has cooled down long enough to try a call
    pub fn is_recovery_due(&self, now: DateTime<Utc>, recovery_timeout: Duration) -> bool {
        match self.last_failure_time {
            Some(last_failure) => elapsed_between(last_failure, now) >= recovery_timeout,
            None => true,
        }
    }

    /// Open -> HalfOpen once the recovery timeout has elapsed
    pub(crate) fn begin_half_open(&self, now: DateTime<Utc>, recovery_timeout: Duration) -> Option<Self> {
        if self.state != CircuitState::Open || !self.is_recovery_due(now, recovery_timeout) {
            return None;
        }

        Some(Self {
            state: CircuitState::HalfOpen,
            success_count: 0,
            ..self.clone()
        })
    }

    pub(crate) fn on_success(&self, success_threshold: u32) -> Option<Self> {
        match self.state {
            CircuitState::HalfOpen => {
                let success_count = self.success_count.saturating_add(1);
                if success_count >= success_threshold {
                    Some(Self {
                        version: self.version,
                        ..Self::closed()
                    })
                } else {
                    Some(Self {
                        success_count,
                        ..self.clone()
                    })
                }
            }
            // Sliding forgiveness: any success clears the failure streak
            CircuitState::Closed if self.failure_count > 0 => Some(Self {
                failure_count: 0,
                ..self.clone()
            }),
            CircuitState::Closed | CircuitState::Open => None,
        }
    }

    pub(crate) fn on_failure(&self, failure_threshold: u32, now: DateTime<Utc>) -> Option<Self> {
        let failure_count = self.failure_count.saturating_add(1);
        let state = match self.state {
            CircuitState::Closed if failure_count >= failure_threshold => CircuitState::Open,
            CircuitState::Closed => CircuitState::Closed,
            CircuitState::HalfOpen | CircuitState::Open => CircuitState::Open,
        };

        Some(Self {
            state,
            failure_count,
            success_count: 0,
            last_failure_time: Some(now),
            version: self.version,
        })
    }

    pub(crate) fn forced_open(&self, now: DateTime<Utc>) -> Option<Self> {
        Some(Self {
            state: CircuitState::Open,
            success_count: 0,
            last_failure_time: Some(now),
            ..self.clone()
        })
    }
}

/// An outcome applied to the shared record as one atomic read-modify-write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCommand {
    Success { success_threshold: u32 },
    Failure { failure_threshold: u32, at: DateTime<Utc> },
    ForceOpen { at: DateTime<Utc> },
}

impl BreakerCommand {
    /// The record after this command, `None` when it changes nothing
    ///
    /// The returned record keeps the input's version; the store bumps it on write.
    pub fn apply(&self, record: &CircuitBreakerState) -> Option<CircuitBreakerState> {
        match *self {
            Self::Success { success_threshold } => record.on_success(success_threshold),
            Self::Failure {
                failure_threshold,
                at,
            } => record.on_failure(failure_threshold, at),
            Self::ForceOpen { at } => record.forced_open(at),
        }
    }
}

/// Record before and after a [`BreakerCommand`]; equal when nothing was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerTransition {
    pub previous: CircuitBreakerState,
    pub current: CircuitBreakerState,
}

impl BreakerTransition {
    pub fn unchanged(record: CircuitBreakerState) -> Self {
        Self {
            previous: record.clone(),
            current: record,
        }
    }
}

/// Read-only view of a breaker for status endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub service: ServiceIdentity,
    pub record: CircuitBreakerState,
    pub calls: CallStatistics,
    /// True when the last store access failed and the record is the local mirror
    pub degraded: bool,
}

/// Shared-state circuit breaker for one service
#[derive(Debug)]
pub struct CircuitBreaker {
    service: ServiceIdentity,
    config: ServiceResilienceConfig,
    store: Arc<dyn CircuitBreakerStore>,
    clock: SharedClock,
    state_ttl: Duration,
    /// Last record read from or written to the store
    last_known: Mutex<CircuitBreakerState>,
    degraded: Mutex<bool>,
    counters: CallCounters,
}

impl CircuitBreaker {
    pub fn new(
        service: ServiceIdentity,
        config: ServiceResilienceConfig,
        store: Arc<dyn CircuitBreakerStore>,
        clock: SharedClock,
        state_ttl: Duration,
    ) -> Self {
        debug!(
            service = %service,
            failure_threshold = config.failure_threshold,
            recovery_timeout_seconds = config.recovery_timeout_seconds,
            success_threshold = config.success_threshold,
            call_timeout_seconds = config.call_timeout_seconds,
            "Circuit breaker initialized"
        );

        Self {
            service,
            config,
            store,
            clock,
            state_ttl,
            last_known: Mutex::new(CircuitBreakerState::closed()),
            degraded: Mutex::new(false),
            counters: CallCounters::default(),
        }
    }

    pub fn service(&self) -> ServiceIdentity {
        self.service
    }

    pub fn config(&self) -> &ServiceResilienceConfig {
        &self.config
    }

    /// Shared record, read through the store (last known record if unreachable)
    pub async fn current_state(&self) -> CircuitBreakerState {
        match self.store.load(self.service.as_str()).await {
            Ok(record) => {
                let record = record.unwrap_or_default();
                self.remember(&record);
                record
            }
            Err(error) => {
                self.mark_degraded("load", &error);
                self.last_known()
            }
        }
    }

    /// Record cached from the most recent store access, without touching the store
    pub fn last_known(&self) -> CircuitBreakerState {
        self.last_known.lock().clone()
    }

    /// Whether a call may proceed
    ///
    /// An open circuit whose recovery timeout has elapsed is moved to half-open here;
    /// exactly one writer wins that transition across all processes.
    pub async fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let recovery_timeout = self.config.recovery_timeout();
        let record = self
            .compare_and_update("begin_half_open", |record| {
                record.begin_half_open(now, recovery_timeout)
            })
            .await;

        !matches!(record.state, CircuitState::Open)
    }

    pub async fn record_success(&self) -> CircuitState {
        let command = BreakerCommand::Success {
            success_threshold: self.config.success_threshold,
        };
        self.apply("record_success", command).await.state
    }

    pub async fn record_failure(&self) -> CircuitState {
        let command = BreakerCommand::Failure {
            failure_threshold: self.config.failure_threshold,
            at: self.clock.now(),
        };
        self.apply("record_failure", command).await.state
    }

    /// Execute an operation with circuit breaker protection and the call timeout
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.can_execute().await {
            return Err(self.reject());
        }

        self.call_with_timeout(operation()).await
    }

    /// Count a call refused because the circuit is open
    pub(crate) fn reject<E>(&self) -> ResilienceError<E> {
        self.counters.record_rejected();
        debug!(service = %self.service, "Call rejected: circuit open");
        ResilienceError::CircuitOpen {
            service: self.service,
        }
    }

    /// Run an already-admitted call under the hard timeout and record its outcome
    pub(crate) async fn call_with_timeout<Fut, T, E>(&self, call: Fut) -> Result<T, ResilienceError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let timeout = self.config.call_timeout();
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, call).await;
        let duration = started.elapsed();

        match result {
            Ok(Ok(value)) => {
                self.counters.record_success(duration);
                self.record_success().await;
                Ok(value)
            }
            Ok(Err(error)) => {
                self.counters.record_failure(duration);
                self.record_failure().await;
                Err(ResilienceError::OperationFailed(error))
            }
            Err(_) => {
                self.counters.record_timeout(duration);
                log_resilience!(warn, "Call timed out",
                    service: self.service,
                    timeout_ms: timeout.as_millis()
                );
                self.record_failure().await;
                Err(ResilienceError::Timeout {
                    service: self.service,
                    timeout,
                })
            }
        }
    }

    /// Force circuit open (manual intervention)
    pub async fn force_open(&self) -> CircuitBreakerState {
        log_resilience!(warn, "Circuit breaker forced open", service: self.service);
        let command = BreakerCommand::ForceOpen {
            at: self.clock.now(),
        };
        self.apply("force_open", command).await
    }

    /// Force circuit back to Closed/0/0 (manual intervention)
    pub async fn reset(&self) -> CircuitBreakerState {
        match self.store.reset(self.service.as_str(), self.state_ttl).await {
            Ok(record) => {
                self.remember(&record);
                log_resilience!(warn, "Circuit breaker reset", service: self.service);
                record
            }
            Err(error) => {
                self.mark_degraded("reset", &error);
                let mut mirror = self.last_known.lock();
                *mirror = CircuitBreakerState {
                    version: mirror.version,
                    ..CircuitBreakerState::closed()
                };
                mirror.clone()
            }
        }
    }

    pub fn call_statistics(&self) -> CallStatistics {
        self.counters.snapshot()
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let record = self.current_state().await;
        CircuitBreakerSnapshot {
            service: self.service,
            record,
            calls: self.call_statistics(),
            degraded: *self.degraded.lock(),
        }
    }

    /// Send `command` to the store, which applies it atomically
    async fn apply(&self, operation: &'static str, command: BreakerCommand) -> CircuitBreakerState {
        match self
            .store
            .apply(self.service.as_str(), &command, self.state_ttl)
            .await
        {
            Ok(transition) => {
                self.remember(&transition.current);
                self.log_transition(&transition.previous, &transition.current);
                transition.current
            }
            Err(error) => {
                let transition = |record: &CircuitBreakerState| command.apply(record);
                self.degraded_update(operation, &error, &transition)
            }
        }
    }

    /// Apply `transition` with an optimistic compare-and-set, retried a bounded number of times
    ///
    /// Used where exactly one caller must win a transition. `transition` returning `None`
    /// means "no change", so nothing is written. Losing every attempt means other writers
    /// kept moving the record; the freshest record read is returned.
    async fn compare_and_update<F>(&self, operation: &'static str, transition: F) -> CircuitBreakerState
    where
        F: Fn(&CircuitBreakerState) -> Option<CircuitBreakerState> + Send + Sync,
    {
        let service = self.service.as_str();
        let mut latest = self.last_known();

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = match self.store.load(service).await {
                Ok(record) => record.unwrap_or_default(),
                Err(error) => return self.degraded_update(operation, &error, &transition),
            };

            let Some(mut next) = transition(&current) else {
                self.remember(&current);
                return current;
            };
            next.version = current.version + 1;

            match self
                .store
                .compare_and_set(service, current.version, &next, self.state_ttl)
                .await
            {
                Ok(true) => {
                    self.remember(&next);
                    self.log_transition(&current, &next);
                    return next;
                }
                Ok(false) => {
                    debug!(
                        service = service,
                        operation = operation,
                        attempt = attempt,
                        "Circuit breaker write lost a race, retrying"
                    );
                    latest = current;
                }
                Err(error) => return self.degraded_update(operation, &error, &transition),
            }
        }

        log_resilience!(warn, "Circuit breaker transition abandoned after contention",
            service: self.service,
            operation: operation,
            attempts: MAX_CAS_ATTEMPTS
        );
        self.remember(&latest);
        latest
    }

    /// Apply the transition to the local mirror when the store is unavailable
    fn degraded_update<F>(&self, operation: &str, error: &StoreError, transition: &F) -> CircuitBreakerState
    where
        F: Fn(&CircuitBreakerState) -> Option<CircuitBreakerState>,
    {
        self.mark_degraded(operation, error);

        let mut mirror = self.last_known.lock();
        if let Some(next) = transition(&*mirror) {
            let previous = std::mem::replace(&mut *mirror, next);
            self.log_transition(&previous, &mirror);
        }
        mirror.clone()
    }

    fn remember(&self, record: &CircuitBreakerState) {
        *self.last_known.lock() = record.clone();
        let mut degraded = self.degraded.lock();
        if *degraded {
            *degraded = false;
            log_resilience!(info, "Circuit breaker store reachable again", service: self.service);
        }
    }

    fn mark_degraded(&self, operation: &str, error: &StoreError) {
        *self.degraded.lock() = true;
        log_resilience!(warn, "Circuit breaker store unavailable, using last known state",
            service: self.service,
            store_operation: operation,
            error: error.to_string()
        );
    }

    fn log_transition(&self, previous: &CircuitBreakerState, next: &CircuitBreakerState) {
        if previous.state == next.state {
            return;
        }

        match next.state {
            CircuitState::Open => {
                log_resilience!(error, "Circuit breaker opened",
                    service: self.service,
                    from: previous.state,
                    failure_count: next.failure_count,
                    failure_threshold: self.config.failure_threshold,
                    recovery_timeout_seconds: self.config.recovery_timeout_seconds
                );
            }
            CircuitState::HalfOpen => {
                log_resilience!(info, "Circuit breaker half-open",
                    service: self.service,
                    success_threshold: self.config.success_threshold
                );
            }
            CircuitState::Closed => {
                log_resilience!(info, "Circuit breaker closed",
                    service: self.service,
                    from: previous.state
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    fn config() -> ServiceResilienceConfig {
        ServiceResilienceConfig {
            failure_threshold: 3,
            recovery_timeout_seconds: 120.0,
            success_threshold: 2,
            call_timeout_seconds: 30.0,
            max_concurrent: 5,
            queue_capacity: 20,
        }
    }

    fn breaker(clock: &ManualClock, store: Arc<InMemoryStore>) -> CircuitBreaker {
        CircuitBreaker::new(
            ServiceIdentity::Reddit,
            config(),
            store,
            clock.shared(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_pure_transitions() {
        let cfg = config();
        let now = Utc::now();

        let mut record = CircuitBreakerState::closed();
        for _ in 0..2 {
            record = record.on_failure(cfg.failure_threshold, now).unwrap();
            assert_eq!(record.state, CircuitState::Closed);
        }
        record = record.on_failure(cfg.failure_threshold, now).unwrap();
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.failure_count, 3);

        assert!(record.begin_half_open(now, cfg.recovery_timeout()).is_none());
        let later = now + chrono::Duration::seconds(121);
        let trial = record.begin_half_open(later, cfg.recovery_timeout()).unwrap();
        assert_eq!(trial.state, CircuitState::HalfOpen);
        assert_eq!(trial.success_count, 0);

        let reopened = trial.on_failure(cfg.failure_threshold, later).unwrap();
        assert_eq!(reopened.state, CircuitState::Open);
    }

    #[test]
    fn test_closed_success_without_failures_is_a_no_op() {
        assert!(CircuitBreakerState::closed()
            .on_success(config().success_threshold)
            .is_none());
    }

    #[test]
    fn test_commands_apply_the_pure_transitions() {
        let now = Utc::now();
        let failure = BreakerCommand::Failure {
            failure_threshold: 2,
            at: now,
        };

        let once = failure.apply(&CircuitBreakerState::closed()).unwrap();
        assert_eq!((once.state, once.failure_count), (CircuitState::Closed, 1));
        let twice = failure.apply(&once).unwrap();
        assert_eq!(twice.state, CircuitState::Open);
        assert_eq!(twice.last_failure_time, Some(now));

        let success = BreakerCommand::Success {
            success_threshold: 1,
        };
        assert!(success.apply(&twice).is_none());
        let half_open = CircuitBreakerState {
            state: CircuitState::HalfOpen,
            ..twice
        };
        let closed = success.apply(&half_open).unwrap();
        assert_eq!(closed.state, CircuitState::Closed);
        assert_eq!(closed.failure_count, 0);
    }

    #[tokio::test]
    async fn test_breaker_persists_through_store() {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryStore::new(clock.shared()));
        let first = breaker(&clock, store.clone());
        let second = breaker(&clock, store.clone());

        for _ in 0..3 {
            first.record_failure().await;
        }

        // A second instance over the same store sees the open circuit
        assert!(!second.can_execute().await);
        assert_eq!(second.current_state().await.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_degraded_mode_uses_last_known_state() {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryStore::new(clock.shared()));
        let circuit = breaker(&clock, store.clone());

        for _ in 0..3 {
            circuit.record_failure().await;
        }
        store.set_unavailable(true);

        assert!(!circuit.can_execute().await);
        let snapshot = circuit.snapshot().await;
        assert!(snapshot.degraded);
        assert_eq!(snapshot.record.state, CircuitState::Open);

        store.set_unavailable(false);
        assert!(!circuit.snapshot().await.degraded);
    }

    #[tokio::test]
    async fn test_reset_and_force_open() {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryStore::new(clock.shared()));
        let circuit = breaker(&clock, store);

        let forced = circuit.force_open().await;
        assert_eq!(forced.state, CircuitState::Open);
        assert!(!circuit.can_execute().await);

        let reset = circuit.reset().await;
        assert_eq!(reset.state, CircuitState::Closed);
        assert_eq!(reset.failure_count, 0);
        assert_eq!(reset.success_count, 0);
        assert!(circuit.can_execute().await);
    }
}
