//! # Resilience Manager
//!
//! Owns one circuit breaker, one bulkhead and (optionally) one rate limiter per
//! configured service and composes them around outbound calls:
//!
//! ```text
//! breaker gate -> bulkhead slot -> rate-limit wait -> operation (under call timeout)
//! ```
//!
//! The breaker is the outer gate, so an open circuit never consumes a bulkhead slot.
//! Every call outcome is sampled into the [`MetricsStore`] for the monitor.

use super::bulkhead::{Bulkhead, BulkheadStats};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};
use super::config::ServiceResilienceConfig;
use super::errors::ResilienceError;
use super::metrics::{CallOutcome, CallSample};
use super::rate_limiter::RateLimiter;
use super::service::ServiceIdentity;
use crate::clock::SharedClock;
use crate::config::PipelineConfig;
use crate::log_resilience;
use crate::store::{MetricsStore, StoreHandles};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// The components guarding one service
#[derive(Debug, Clone)]
pub struct ServiceResilience {
    pub config: ServiceResilienceConfig,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub bulkhead: Arc<Bulkhead>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

/// Read-only snapshot of one service's guards, for admin endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: ServiceIdentity,
    pub config: ServiceResilienceConfig,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub bulkhead: BulkheadStats,
    pub rate_limit_remaining: Option<u32>,
}

#[derive(Debug)]
pub struct ResilienceManager {
    services: BTreeMap<ServiceIdentity, ServiceResilience>,
    metrics: Arc<dyn MetricsStore>,
    clock: SharedClock,
    sample_retention: Duration,
}

impl ResilienceManager {
    /// Build the per-service guards from the static configuration table
    pub fn new(config: &PipelineConfig, stores: &StoreHandles, clock: SharedClock) -> Self {
        let state_ttl = config.store.circuit_state_ttl();

        let services = config
            .resilience
            .services
            .iter()
            .map(|(&service, &service_config)| {
                let circuit_breaker = Arc::new(CircuitBreaker::new(
                    service,
                    service_config,
                    Arc::clone(&stores.circuit_breakers),
                    Arc::clone(&clock),
                    state_ttl,
                ));
                let bulkhead = Arc::new(Bulkhead::new(
                    service,
                    service_config.max_concurrent,
                    service_config.queue_capacity,
                ));
                let rate_limiter = config.rate_limits.get(&service).map(|&limit| {
                    Arc::new(RateLimiter::new(
                        service.as_str(),
                        limit,
                        Arc::clone(&stores.rate_limits),
                        Arc::clone(&clock),
                    ))
                });

                (
                    service,
                    ServiceResilience {
                        config: service_config,
                        circuit_breaker,
                        bulkhead,
                        rate_limiter,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        debug!(
            services = ?services.keys().collect::<Vec<_>>(),
            "Resilience manager initialized"
        );

        Self {
            services,
            metrics: Arc::clone(&stores.metrics),
            clock,
            sample_retention: config.monitor.metrics_window(),
        }
    }

    pub fn service(&self, service: ServiceIdentity) -> Option<&ServiceResilience> {
        self.services.get(&service)
    }

    /// Services with resilience configuration, in stable order
    pub fn services(&self) -> impl Iterator<Item = ServiceIdentity> + '_ {
        self.services.keys().copied()
    }

    pub fn metrics_store(&self) -> &Arc<dyn MetricsStore> {
        &self.metrics
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Run `operation_fn` for `service` behind its breaker, bulkhead and rate limiter
    ///
    /// Services without configuration are executed directly.
    pub async fn execute_with_resilience<F, Fut, T, E>(
        &self,
        service: ServiceIdentity,
        operation: &str,
        operation_fn: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(guards) = self.services.get(&service) else {
            log_resilience!(warn, "No resilience configuration, executing unguarded",
                service: service,
                call: operation
            );
            return operation_fn().await.map_err(ResilienceError::OperationFailed);
        };

        if !guards.circuit_breaker.can_execute().await {
            self.record_sample(service, operation, CallOutcome::Rejected, Duration::ZERO)
                .await;
            return Err(guards.circuit_breaker.reject());
        }

        let _permit = match guards.bulkhead.acquire().await {
            Ok(permit) => permit,
            Err(rejection) => {
                self.record_sample(service, operation, CallOutcome::Rejected, Duration::ZERO)
                    .await;
                return Err(rejection.into());
            }
        };

        if let Some(rate_limiter) = &guards.rate_limiter {
            rate_limiter.acquire_or_wait().await;
        }

        let started = Instant::now();
        let result = guards
            .circuit_breaker
            .call_with_timeout(operation_fn())
            .await;

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(ResilienceError::Timeout { .. }) => CallOutcome::Timeout,
            Err(_) => CallOutcome::Failure,
        };
        self.record_sample(service, operation, outcome, started.elapsed())
            .await;

        result
    }

    pub async fn get_service_status(&self, service: ServiceIdentity) -> Option<ServiceStatus> {
        let guards = self.services.get(&service)?;

        let rate_limit_remaining = match &guards.rate_limiter {
            Some(rate_limiter) => Some(rate_limiter.remaining().await),
            None => None,
        };

        Some(ServiceStatus {
            service,
            config: guards.config,
            circuit_breaker: guards.circuit_breaker.snapshot().await,
            bulkhead: guards.bulkhead.stats(),
            rate_limit_remaining,
        })
    }

    pub async fn get_all_status(&self) -> BTreeMap<ServiceIdentity, ServiceStatus> {
        let mut statuses = BTreeMap::new();
        for service in self.services() {
            if let Some(status) = self.get_service_status(service).await {
                statuses.insert(service, status);
            }
        }
        statuses
    }

    async fn record_sample(
        &self,
        service: ServiceIdentity,
        operation: &str,
        outcome: CallOutcome,
        duration: Duration,
    ) {
        let sample = CallSample::new(service, operation, outcome, duration, self.clock.now());
        if let Err(error) = self.metrics.record_call(&sample, self.sample_retention).await {
            debug!(
                service = %service,
                call = operation,
                error = %error,
                "Failed to record call sample"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(clock: &ManualClock) -> ResilienceManager {
        let mut config = PipelineConfig::default();
        config.rate_limits.clear();
        ResilienceManager::new(&config, &StoreHandles::in_memory(clock.shared()), clock.shared())
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits_before_bulkhead() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result: Result<(), _> = manager
                .execute_with_resilience(ServiceIdentity::Reddit, "fetch_posts", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("upstream 503")
                })
                .await;
            assert!(matches!(result, Err(ResilienceError::OperationFailed(_))));
        }

        let result = manager
            .execute_with_resilience(ServiceIdentity::Reddit, "fetch_posts", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let status = manager
            .get_service_status(ServiceIdentity::Reddit)
            .await
            .unwrap();
        assert_eq!(status.circuit_breaker.record.state, CircuitState::Open);
        assert_eq!(status.bulkhead.active_count, 0);
        assert_eq!(status.circuit_breaker.calls.rejected_count, 1);
    }

    #[tokio::test]
    async fn test_samples_recorded_per_outcome() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let since = clock.now();

        let _ = manager
            .execute_with_resilience(ServiceIdentity::OpenAi, "summarize", || async {
                Ok::<_, String>("summary")
            })
            .await;
        let _ = manager
            .execute_with_resilience(ServiceIdentity::OpenAi, "summarize", || async {
                Err::<(), _>("rate limited".to_string())
            })
            .await;

        let samples = manager
            .metrics_store()
            .calls_since(ServiceIdentity::OpenAi.as_str(), since)
            .await
            .unwrap();
        let outcomes: Vec<CallOutcome> = samples.iter().map(|s| s.outcome).collect();
        assert_eq!(outcomes, vec![CallOutcome::Success, CallOutcome::Failure]);
    }

    #[tokio::test]
    async fn test_unconfigured_service_runs_unguarded() {
        let clock = ManualClock::starting_now();
        let mut config = PipelineConfig::default();
        config.resilience.services.remove(&ServiceIdentity::Vault);
        let manager =
            ResilienceManager::new(&config, &StoreHandles::in_memory(clock.shared()), clock.shared());

        let value = manager
            .execute_with_resilience(ServiceIdentity::Vault, "read_secret", || async {
                Ok::<_, String>(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert!(manager.get_service_status(ServiceIdentity::Vault).await.is_none());
        assert_eq!(manager.get_all_status().await.len(), ServiceIdentity::ALL.len() - 1);
    }
}
