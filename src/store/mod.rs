//! # Shared State Stores
//!
//! Storage seams for everything the resilience and state-tracking components share
//! across processes: breaker records, rate-limit request logs, state-change events,
//! call samples, metrics history and alerts. Entity records live behind the separate
//! [`EntityRepository`] seam because they belong to the authoritative database.
//!
//! Backends:
//! - [`InMemoryStore`] / [`InMemoryEntityRepository`] for tests and single-process runs
//! - `RedisStore` (feature `redis-store`) for the shared key-value store
//! - `PgEntityRepository` (feature `postgres`) for the entity table

pub mod errors;
pub mod memory;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis-store")]
pub mod redis;

pub use errors::{StoreError, StoreResult};
pub use memory::{InMemoryEntityRepository, InMemoryStore};
pub use traits::{
    CircuitBreakerStore, EntityRepository, MetricsStore, RateLimitStore, StateEventStore,
    StatusUpdate,
};

#[cfg(feature = "postgres")]
pub use postgres::PgEntityRepository;
#[cfg(feature = "redis-store")]
pub use redis::RedisStore;

use crate::clock::SharedClock;
use std::sync::Arc;

/// The set of store handles a pipeline component graph is wired with
#[derive(Debug, Clone)]
pub struct StoreHandles {
    pub circuit_breakers: Arc<dyn CircuitBreakerStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
    pub events: Arc<dyn StateEventStore>,
    pub metrics: Arc<dyn MetricsStore>,
    pub entities: Arc<dyn EntityRepository>,
}

impl StoreHandles {
    /// Every shared-state seam backed by one store, plus an entity repository
    pub fn shared<S>(store: Arc<S>, entities: Arc<dyn EntityRepository>) -> Self
    where
        S: CircuitBreakerStore + RateLimitStore + StateEventStore + MetricsStore + 'static,
    {
        Self {
            circuit_breakers: store.clone(),
            rate_limits: store.clone(),
            events: store.clone(),
            metrics: store,
            entities,
        }
    }

    /// Fully in-memory wiring
    pub fn in_memory(clock: SharedClock) -> Self {
        Self::shared(
            Arc::new(InMemoryStore::new(clock)),
            Arc::new(InMemoryEntityRepository::new()),
        )
    }
}
