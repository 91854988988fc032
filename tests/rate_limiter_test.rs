//! Sliding-window rate limiting shared between processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pipeline_core::clock::ManualClock;
use pipeline_core::config::PipelineConfig;
use pipeline_core::resilience::{RateLimitConfig, RateLimiter, ResilienceManager, ServiceIdentity};
use pipeline_core::store::{InMemoryStore, RateLimitStore, StoreHandles, StoreResult};
use std::sync::Arc;
use std::time::Duration;

/// Yields to the scheduler before every store call so concurrent callers interleave
/// the way they do against a networked store
#[derive(Debug)]
struct InterleavingStore {
    inner: InMemoryStore,
}

#[async_trait]
impl RateLimitStore for InterleavingStore {
    async fn count_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<u32> {
        tokio::task::yield_now().await;
        self.inner.count_in_window(key, window, now).await
    }

    async fn record(&self, key: &str, window: Duration, now: DateTime<Utc>) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.inner.record(key, window, now).await
    }

    async fn oldest_in_window(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        tokio::task::yield_now().await;
        self.inner.oldest_in_window(key, window, now).await
    }

    async fn try_record(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        tokio::task::yield_now().await;
        self.inner.try_record(key, max_requests, window, now).await
    }
}

fn reddit_limited_config(max_requests: u32) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.rate_limits.insert(
        ServiceIdentity::Reddit,
        RateLimitConfig {
            max_requests,
            window_seconds: 60,
        },
    );
    config
}

fn reddit_limiter(clock: &ManualClock, store: Arc<InMemoryStore>) -> RateLimiter {
    RateLimiter::new(
        ServiceIdentity::Reddit.as_str(),
        RateLimitConfig {
            max_requests: 60,
            window_seconds: 60,
        },
        store,
        clock.shared(),
    )
}

#[tokio::test]
async fn test_two_processes_draw_from_one_window() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new(clock.shared()));
    let worker_a = reddit_limiter(&clock, Arc::clone(&store));
    let worker_b = reddit_limiter(&clock, Arc::clone(&store));

    for i in 0..60 {
        let limiter = if i % 2 == 0 { &worker_a } else { &worker_b };
        assert!(limiter.acquire().await, "request {i} should be admitted");
    }

    assert!(!worker_a.acquire().await);
    assert!(!worker_b.acquire().await);
    assert_eq!(worker_b.remaining().await, 0);

    // Oldest entry is exactly now: full window plus padding
    assert_eq!(worker_a.wait_duration().await.unwrap(), Duration::from_secs(61));

    clock.advance(Duration::from_secs(30));
    assert_eq!(worker_a.wait_duration().await.unwrap(), Duration::from_secs(31));

    clock.advance(Duration::from_secs(31));
    assert_eq!(worker_a.remaining().await, 60);
    assert!(worker_b.acquire().await);
}

#[tokio::test]
async fn test_requests_slide_out_individually() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new(clock.shared()));
    let limiter = RateLimiter::new(
        "openai",
        RateLimitConfig {
            max_requests: 2,
            window_seconds: 10,
        },
        store,
        clock.shared(),
    );

    assert!(limiter.acquire().await);
    clock.advance(Duration::from_secs(6));
    assert!(limiter.acquire().await);
    assert!(!limiter.try_acquire().await);

    // First request leaves the window, the second is still in it
    clock.advance(Duration::from_secs(5));
    assert!(limiter.try_acquire().await);
    assert_eq!(limiter.remaining().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_manager_waits_out_a_full_window() {
    let clock = ManualClock::starting_now();
    let manager = Arc::new(ResilienceManager::new(
        &reddit_limited_config(2),
        &StoreHandles::in_memory(clock.shared()),
        clock.shared(),
    ));

    for _ in 0..2 {
        manager
            .execute_with_resilience(ServiceIdentity::Reddit, "fetch_new", || async {
                Ok::<_, String>(())
            })
            .await
            .unwrap();
    }

    let started = tokio::time::Instant::now();
    let third = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .execute_with_resilience(ServiceIdentity::Reddit, "fetch_new", || async {
                    Ok::<_, String>(())
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!third.is_finished());

    clock.advance(Duration::from_secs(61));
    third.await.unwrap().unwrap();
    assert!(started.elapsed() >= Duration::from_secs(61));

    let limiter = manager
        .service(ServiceIdentity::Reddit)
        .and_then(|guards| guards.rate_limiter.clone())
        .unwrap();
    assert_eq!(limiter.remaining().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_never_exceed_the_window() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InterleavingStore {
        inner: InMemoryStore::new(clock.shared()),
    });
    let mut stores = StoreHandles::in_memory(clock.shared());
    stores.rate_limits = store.clone();
    let manager = Arc::new(ResilienceManager::new(
        &reddit_limited_config(60),
        &stores,
        clock.shared(),
    ));

    let window = Duration::from_secs(60);
    for _ in 0..59 {
        store.inner.record("reddit", window, clock.now()).await.unwrap();
    }

    let calls: Vec<_> = (0..5)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .execute_with_resilience(ServiceIdentity::Reddit, "fetch_new", || async {
                        Ok::<_, String>(())
                    })
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(store.inner.count_in_window("reddit", window, clock.now()).await.unwrap(), 60);
    assert_eq!(calls.iter().filter(|call| call.is_finished()).count(), 1);

    clock.advance(Duration::from_secs(61));
    for call in calls {
        call.await.unwrap().unwrap();
    }
    assert_eq!(store.inner.count_in_window("reddit", window, clock.now()).await.unwrap(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_store_outage_fails_open() {
    let clock = ManualClock::starting_now();
    let store = Arc::new(InMemoryStore::new(clock.shared()));
    let limiter = reddit_limiter(&clock, Arc::clone(&store));
    store.set_unavailable(true);

    assert!(limiter.acquire().await);
    assert!(limiter.try_acquire().await);
    assert_eq!(limiter.remaining().await, 60);
    assert_eq!(limiter.wait_if_needed().await, Duration::from_secs(1));
}
