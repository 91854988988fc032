//! Circuit breaker behaviour through the public API, including breakers in separate
//! "processes" sharing one store.

use async_trait::async_trait;
use pipeline_core::clock::ManualClock;
use pipeline_core::config::PipelineConfig;
use pipeline_core::resilience::{
    BreakerCommand, BreakerTransition, CircuitBreaker, CircuitBreakerState, CircuitState,
    ResilienceError, ResilienceManager, ServiceIdentity, ServiceResilienceConfig,
};
use pipeline_core::store::{CircuitBreakerStore, InMemoryStore, StoreHandles, StoreResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Yields before every store call so concurrent breakers interleave their reads and writes
#[derive(Debug)]
struct InterleavingStore {
    inner: InMemoryStore,
}

#[async_trait]
impl CircuitBreakerStore for InterleavingStore {
    async fn load(&self, service: &str) -> StoreResult<Option<CircuitBreakerState>> {
        tokio::task::yield_now().await;
        self.inner.load(service).await
    }

    async fn compare_and_set(
        &self,
        service: &str,
        expected_version: u64,
        next: &CircuitBreakerState,
        ttl: Duration,
    ) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner
            .compare_and_set(service, expected_version, next, ttl)
            .await
    }

    async fn apply(
        &self,
        service: &str,
        command: &BreakerCommand,
        ttl: Duration,
    ) -> StoreResult<BreakerTransition> {
        tokio::task::yield_now().await;
        self.inner.apply(service, command, ttl).await
    }

    async fn reset(&self, service: &str, ttl: Duration) -> StoreResult<CircuitBreakerState> {
        tokio::task::yield_now().await;
        self.inner.reset(service, ttl).await
    }
}

fn reddit_breaker(clock: &ManualClock, store: Arc<InMemoryStore>) -> CircuitBreaker {
    CircuitBreaker::new(
        ServiceIdentity::Reddit,
        ServiceResilienceConfig::for_service(ServiceIdentity::Reddit),
        store,
        clock.shared(),
        Duration::from_secs(3600),
    )
}

fn manager_without_rate_limits(clock: &ManualClock) -> ResilienceManager {
    let mut config = PipelineConfig::default();
    config.rate_limits.clear();
    ResilienceManager::new(&config, &StoreHandles::in_memory(clock.shared()), clock.shared())
}

#[tokio::test]
async fn test_reddit_trips_after_three_failures_and_recovers_after_cooldown() {
    let clock = ManualClock::starting_now();
    let manager = manager_without_rate_limits(&clock);
    let invoked = AtomicU32::new(0);

    for _ in 0..3 {
        let result = manager
            .execute_with_resilience(ServiceIdentity::Reddit, "fetch_hot", || async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("503 Service Unavailable")
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed(_))));
    }

    let reddit = manager.service(ServiceIdentity::Reddit).unwrap();
    assert_eq!(reddit.circuit_breaker.current_state().await.state, CircuitState::Open);

    // Rejected without invoking the operation
    let rejected = manager
        .execute_with_resilience(ServiceIdentity::Reddit, "fetch_hot", || async {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await;
    assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(invoked.load(Ordering::SeqCst), 3);

    // Still open just before the 120s recovery timeout
    clock.advance(Duration::from_secs(119));
    assert!(!reddit.circuit_breaker.can_execute().await);

    clock.advance(Duration::from_secs(2));
    manager
        .execute_with_resilience(ServiceIdentity::Reddit, "fetch_hot", || async {
            Ok::<_, &str>(())
        })
        .await
        .unwrap();
    let record = reddit.circuit_breaker.current_state().await;
    assert_eq!(record.state, CircuitState::HalfOpen);
    assert_eq!(record.success_count, 1);

    manager
        .execute_with_resilience(ServiceIdentity::Reddit, "fetch_hot", || async {
            Ok::<_, &str>(())
        })
        .await
        .unwrap();
    let record = reddit.circuit_breaker.current_state().await;
    assert_eq!(record.state, CircuitState::Closed);
    assert_eq!(record.failure_count, 0);
    assert_eq!(record.success_count, 0);
}

#[tokio::test]
async fn test_failure_while_half_open_reopens() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new(clock.shared()));
    let breaker = reddit_breaker(&clock, store);

    for _ in 0..3 {
        breaker.record_failure().await;
    }
    clock.advance(Duration::from_secs(121));
    assert!(breaker.can_execute().await);
    assert_eq!(breaker.current_state().await.state, CircuitState::HalfOpen);

    assert_eq!(breaker.record_failure().await, CircuitState::Open);

    // The cooldown restarts from the half-open failure
    clock.advance(Duration::from_secs(60));
    assert!(!breaker.can_execute().await);
}

#[tokio::test]
async fn test_breakers_in_two_processes_share_state() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new(clock.shared()));
    let worker_a = reddit_breaker(&clock, Arc::clone(&store));
    let worker_b = reddit_breaker(&clock, Arc::clone(&store));

    worker_a.record_failure().await;
    worker_b.record_failure().await;
    assert_eq!(worker_a.current_state().await.failure_count, 2);

    worker_a.record_failure().await;
    assert!(!worker_b.can_execute().await);

    clock.advance(Duration::from_secs(121));
    let (a, b) = tokio::join!(worker_a.can_execute(), worker_b.can_execute());
    assert!(a && b);

    let record = store.load(ServiceIdentity::Reddit.as_str()).await.unwrap().unwrap();
    assert_eq!(record.state, CircuitState::HalfOpen);
}

#[tokio::test]
async fn test_success_while_closed_clears_failure_streak() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new(clock.shared()));
    let breaker = reddit_breaker(&clock, store);

    breaker.record_failure().await;
    breaker.record_failure().await;
    breaker.record_success().await;
    breaker.record_failure().await;
    breaker.record_failure().await;

    let record = breaker.current_state().await;
    assert_eq!(record.state, CircuitState::Closed);
    assert_eq!(record.failure_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new(clock.shared()));
    let config = ServiceResilienceConfig {
        failure_threshold: 1,
        call_timeout_seconds: 0.5,
        ..ServiceResilienceConfig::for_service(ServiceIdentity::OpenAi)
    };
    let breaker = CircuitBreaker::new(
        ServiceIdentity::OpenAi,
        config,
        store,
        clock.shared(),
        Duration::from_secs(3600),
    );

    let result = breaker
        .execute(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>("late summary")
        })
        .await;
    assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
    assert_eq!(breaker.current_state().await.state, CircuitState::Open);
    assert_eq!(breaker.call_statistics().timeout_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_counted() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InterleavingStore {
        inner: InMemoryStore::new(clock.shared()),
    });
    let config = ServiceResilienceConfig {
        failure_threshold: 10,
        ..ServiceResilienceConfig::for_service(ServiceIdentity::Reddit)
    };
    let breaker = Arc::new(CircuitBreaker::new(
        ServiceIdentity::Reddit,
        config,
        store.clone(),
        clock.shared(),
        Duration::from_secs(3600),
    ));

    let failures: Vec<_> = (0..12)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move { breaker.record_failure().await })
        })
        .collect();
    for failure in failures {
        failure.await.unwrap();
    }

    let record = store
        .inner
        .load(ServiceIdentity::Reddit.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, CircuitState::Open);
    assert_eq!(record.failure_count, 12);
    assert_eq!(record.version, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_half_open_transition() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InterleavingStore {
        inner: InMemoryStore::new(clock.shared()),
    });
    let breaker = Arc::new(CircuitBreaker::new(
        ServiceIdentity::Reddit,
        ServiceResilienceConfig::for_service(ServiceIdentity::Reddit),
        store.clone(),
        clock.shared(),
        Duration::from_secs(3600),
    ));
    breaker.force_open().await;
    clock.advance(Duration::from_secs(121));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move { breaker.can_execute().await })
        })
        .collect();
    for caller in callers {
        assert!(caller.await.unwrap());
    }

    // Forced open is version 1; the half-open write happens exactly once
    let record = store
        .inner
        .load(ServiceIdentity::Reddit.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, CircuitState::HalfOpen);
    assert_eq!(record.version, 2);
}
