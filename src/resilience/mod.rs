//! # Resilience Module
//!
//! Fault isolation for outbound calls to the pipeline's upstream services (Reddit,
//! OpenAI, Ghost, Vault, plus the database and Redis).
//!
//! ## Architecture
//!
//! - **Circuit Breakers**: shared across worker processes through a
//!   [`CircuitBreakerStore`](crate::store::CircuitBreakerStore); stop calling a failing
//!   dependency for a cooldown period
//! - **Bulkheads**: process-local concurrency caps with a bounded FIFO queue
//! - **Rate Limiters**: sliding-window request allowance over a shared request log
//! - **Manager**: composes the three per service around every call
//! - **Monitor**: periodic sampling, alerting and operator interventions
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pipeline_core::clock::SystemClock;
//! use pipeline_core::config::PipelineConfig;
//! use pipeline_core::resilience::{ResilienceManager, ServiceIdentity};
//! use pipeline_core::store::StoreHandles;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = SystemClock::shared();
//! let manager = ResilienceManager::new(
//!     &PipelineConfig::default(),
//!     &StoreHandles::in_memory(clock.clone()),
//!     clock,
//! );
//!
//! let posts = manager
//!     .execute_with_resilience(ServiceIdentity::Reddit, "fetch_hot_posts", || async {
//!         Ok::<_, std::io::Error>(vec!["post-1", "post-2"])
//!     })
//!     .await?;
//! # let _ = posts;
//! # Ok(())
//! # }
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod manager;
pub mod metrics;
pub mod monitor;
pub mod rate_limiter;
pub mod service;

pub use bulkhead::{Bulkhead, BulkheadPermit, BulkheadStats};
pub use circuit_breaker::{
    BreakerCommand, BreakerTransition, CircuitBreaker, CircuitBreakerSnapshot,
    CircuitBreakerState, CircuitState,
};
pub use config::{RateLimitConfig, ServiceResilienceConfig};
pub use errors::{BulkheadFull, ResilienceError};
pub use manager::{ResilienceManager, ServiceResilience, ServiceStatus};
pub use metrics::{
    Alert, AlertKind, AlertSeverity, CallOutcome, CallSample, CallStatistics, ResilienceMetrics,
};
pub use monitor::{HealthStatus, MonitorCycleReport, ResilienceMonitor, ResolvedAlert, ServiceHealth};
pub use rate_limiter::RateLimiter;
pub use service::ServiceIdentity;
