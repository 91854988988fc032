//! # Resilience Monitor
//!
//! Periodic sampling of every guarded service: breaker record, bulkhead occupancy and
//! the trailing window of call samples. Each cycle computes rates, evaluates alert
//! conditions, persists new alerts and appends a metrics snapshot to the rolling history.
//!
//! Alerts are deduplicated per `(service, kind)`: an alert fires once when its condition
//! becomes true and re-arms only after the condition has cleared.
//!
//! Also hosts the operator interventions exposed to the admin surface
//! ([`reset_circuit_breaker`](ResilienceMonitor::reset_circuit_breaker),
//! [`adjust_bulkhead_limits`](ResilienceMonitor::adjust_bulkhead_limits)).

use super::bulkhead::BulkheadStats;
use super::circuit_breaker::{CircuitBreakerState, CircuitState};
use super::manager::ResilienceManager;
use super::metrics::{Alert, AlertKind, AlertSeverity, ResilienceMetrics};
use super::service::ServiceIdentity;
use crate::clock::{to_chrono, SharedClock};
use crate::config::{ConfigResult, ConfigurationError, MonitorConfig};
use crate::log_resilience;
use crate::store::StoreResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health view of one service for the admin surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: ServiceIdentity,
    pub status: HealthStatus,
    pub metrics: ResilienceMetrics,
    pub active_alerts: Vec<AlertKind>,
}

/// An alert whose condition cleared this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAlert {
    pub service: ServiceIdentity,
    pub kind: AlertKind,
}

/// Result of one sampling pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorCycleReport {
    pub collected_at: DateTime<Utc>,
    pub metrics: Vec<ResilienceMetrics>,
    pub raised: Vec<Alert>,
    pub resolved: Vec<ResolvedAlert>,
}

/// A condition that currently holds
#[derive(Debug, Clone)]
struct Condition {
    kind: AlertKind,
    value: f64,
    threshold: f64,
    message: String,
}

#[derive(Debug)]
pub struct ResilienceMonitor {
    manager: Arc<ResilienceManager>,
    config: MonitorConfig,
    clock: SharedClock,
    active_alerts: Mutex<BTreeSet<(ServiceIdentity, AlertKind)>>,
}

impl ResilienceMonitor {
    pub fn new(manager: Arc<ResilienceManager>, config: MonitorConfig) -> Self {
        let clock = Arc::clone(manager.clock());
        Self {
            manager,
            config,
            clock,
            active_alerts: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// One sampling pass over every configured service
    pub async fn run_cycle(&self) -> MonitorCycleReport {
        let collected_at = self.clock.now();
        let mut report = MonitorCycleReport {
            collected_at,
            metrics: Vec::new(),
            raised: Vec::new(),
            resolved: Vec::new(),
        };

        let services: Vec<ServiceIdentity> = self.manager.services().collect();
        for service in services {
            let Some(metrics) = self.collect_metrics(service).await else {
                continue;
            };

            let conditions = self.evaluate(&metrics);
            let (raised, resolved) = self.reconcile_alerts(service, &conditions, collected_at);

            for alert in &raised {
                if let Err(error) = self
                    .manager
                    .metrics_store()
                    .save_alert(alert, self.config.alert_ttl())
                    .await
                {
                    warn!(service = %service, kind = %alert.kind, error = %error, "Failed to persist alert");
                }
            }

            if let Err(error) = self
                .manager
                .metrics_store()
                .append_metrics_snapshot(&metrics, self.config.history_retention())
                .await
            {
                warn!(service = %service, error = %error, "Failed to persist metrics snapshot");
            }

            report.raised.extend(raised);
            report.resolved.extend(resolved);
            report.metrics.push(metrics);
        }

        debug!(
            services = report.metrics.len(),
            raised = report.raised.len(),
            resolved = report.resolved.len(),
            "Resilience monitor cycle complete"
        );
        report
    }

    /// Run [`run_cycle`](Self::run_cycle) every interval until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        info!(
            interval_seconds = self.config.interval_seconds,
            "Starting resilience monitor loop"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Resilience monitor loop stopped");
        })
    }

    /// Current metrics for one service plus its active alerts
    pub async fn get_service_health(&self, service: ServiceIdentity) -> ConfigResult<ServiceHealth> {
        let metrics = self
            .collect_metrics(service)
            .await
            .ok_or_else(|| ConfigurationError::unknown_service(service))?;

        let active_alerts: Vec<AlertKind> = self
            .active_alerts
            .lock()
            .iter()
            .filter(|(alerted, _)| *alerted == service)
            .map(|(_, kind)| *kind)
            .collect();

        let status = if metrics.circuit_state == CircuitState::Open
            || metrics.failure_rate >= self.config.failure_rate_threshold
        {
            HealthStatus::Unhealthy
        } else if metrics.circuit_state == CircuitState::HalfOpen || !active_alerts.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Ok(ServiceHealth {
            service,
            status,
            metrics,
            active_alerts,
        })
    }

    /// Force a service's breaker back to closed with zero counts
    pub async fn reset_circuit_breaker(
        &self,
        service: ServiceIdentity,
    ) -> ConfigResult<CircuitBreakerState> {
        let guards = self
            .manager
            .service(service)
            .ok_or_else(|| ConfigurationError::unknown_service(service))?;

        let record = guards.circuit_breaker.reset().await;
        log_resilience!(warn, "Circuit breaker reset by operator", service: service);
        Ok(record)
    }

    /// Live-resize a service's bulkhead; queued callers are kept
    pub fn adjust_bulkhead_limits(
        &self,
        service: ServiceIdentity,
        max_concurrent: Option<u32>,
        queue_capacity: Option<u32>,
    ) -> ConfigResult<BulkheadStats> {
        if max_concurrent == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "max_concurrent",
                "0",
                "must be greater than 0",
            ));
        }

        let guards = self
            .manager
            .service(service)
            .ok_or_else(|| ConfigurationError::unknown_service(service))?;

        Ok(guards.bulkhead.resize(max_concurrent, queue_capacity))
    }

    /// Alerts persisted in the store, newest first
    pub async fn recent_alerts(&self, limit: usize) -> StoreResult<Vec<Alert>> {
        self.manager.metrics_store().recent_alerts(limit).await
    }

    pub async fn metrics_history(
        &self,
        service: ServiceIdentity,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<ResilienceMetrics>> {
        self.manager
            .metrics_store()
            .metrics_history(service.as_str(), since)
            .await
    }

    /// `(service, kind)` pairs whose condition currently holds
    pub fn active_alerts(&self) -> Vec<(ServiceIdentity, AlertKind)> {
        self.active_alerts.lock().iter().copied().collect()
    }

    async fn collect_metrics(&self, service: ServiceIdentity) -> Option<ResilienceMetrics> {
        let guards = self.manager.service(service)?;
        let now = self.clock.now();

        let record = guards.circuit_breaker.current_state().await;
        let bulkhead = guards.bulkhead.stats();

        let since = now - to_chrono(self.config.metrics_window());
        let samples = match self
            .manager
            .metrics_store()
            .calls_since(service.as_str(), since)
            .await
        {
            Ok(samples) => samples,
            Err(error) => {
                warn!(service = %service, error = %error, "Call samples unavailable, rates reported as zero");
                Vec::new()
            }
        };
        let rates =
            ResilienceMetrics::window_rates(&samples, u64::from(self.config.min_samples_for_rates));

        Some(ResilienceMetrics {
            service,
            collected_at: now,
            circuit_state: record.state,
            consecutive_failures: record.failure_count,
            active_calls: bulkhead.active_count,
            queued_calls: bulkhead.queue_length,
            available_slots: bulkhead.available_slots,
            queue_utilization: bulkhead.queue_utilization(),
            window_calls: rates.window_calls,
            window_failures: rates.window_failures,
            window_rejections: rates.window_rejections,
            failure_rate: rates.failure_rate,
            success_rate: rates.success_rate,
            avg_response_time_ms: rates.avg_response_time_ms,
        })
    }

    fn evaluate(&self, metrics: &ResilienceMetrics) -> Vec<Condition> {
        let mut conditions = Vec::new();

        match metrics.circuit_state {
            CircuitState::Open => conditions.push(Condition {
                kind: AlertKind::CircuitOpen,
                value: f64::from(metrics.consecutive_failures),
                threshold: 0.0,
                message: format!("Circuit breaker for {} is open", metrics.service),
            }),
            CircuitState::HalfOpen => conditions.push(Condition {
                kind: AlertKind::CircuitHalfOpen,
                value: 0.0,
                threshold: 0.0,
                message: format!("Circuit breaker for {} is probing recovery", metrics.service),
            }),
            CircuitState::Closed => {}
        }

        if metrics.queue_utilization >= self.config.queue_utilization_threshold {
            conditions.push(Condition {
                kind: AlertKind::BulkheadSaturation,
                value: metrics.queue_utilization,
                threshold: self.config.queue_utilization_threshold,
                message: format!(
                    "Bulkhead queue for {} at {:.0}% capacity",
                    metrics.service,
                    metrics.queue_utilization * 100.0
                ),
            });
        }

        if metrics.window_calls > 0 && metrics.failure_rate >= self.config.failure_rate_threshold {
            conditions.push(Condition {
                kind: AlertKind::HighFailureRate,
                value: metrics.failure_rate,
                threshold: self.config.failure_rate_threshold,
                message: format!(
                    "Failure rate for {} is {:.1}%",
                    metrics.service,
                    metrics.failure_rate * 100.0
                ),
            });
        }

        let slow_threshold_ms = self.config.response_time_threshold_ms();
        if metrics.window_calls > 0 && metrics.avg_response_time_ms >= slow_threshold_ms {
            conditions.push(Condition {
                kind: AlertKind::SlowResponses,
                value: metrics.avg_response_time_ms,
                threshold: slow_threshold_ms,
                message: format!(
                    "Average response time for {} is {:.0}ms",
                    metrics.service, metrics.avg_response_time_ms
                ),
            });
        }

        conditions
    }

    /// Fire conditions that were not active, clear active alerts whose condition is gone
    fn reconcile_alerts(
        &self,
        service: ServiceIdentity,
        conditions: &[Condition],
        now: DateTime<Utc>,
    ) -> (Vec<Alert>, Vec<ResolvedAlert>) {
        let mut active = self.active_alerts.lock();
        let mut raised = Vec::new();

        for condition in conditions {
            if !active.insert((service, condition.kind)) {
                continue;
            }

            let alert = Alert {
                id: Uuid::new_v4(),
                service,
                kind: condition.kind,
                severity: condition.kind.severity(),
                message: condition.message.clone(),
                value: condition.value,
                threshold: condition.threshold,
                raised_at: now,
            };

            match alert.severity {
                AlertSeverity::Critical => {
                    log_resilience!(error, "Resilience alert raised",
                        service: service,
                        kind: alert.kind,
                        message: alert.message,
                        value: alert.value,
                        threshold: alert.threshold
                    );
                }
                AlertSeverity::Warning => {
                    log_resilience!(warn, "Resilience alert raised",
                        service: service,
                        kind: alert.kind,
                        message: alert.message,
                        value: alert.value,
                        threshold: alert.threshold
                    );
                }
            }
            raised.push(alert);
        }

        let cleared: Vec<(ServiceIdentity, AlertKind)> = active
            .iter()
            .filter(|(alerted, kind)| {
                *alerted == service && !conditions.iter().any(|c| c.kind == *kind)
            })
            .copied()
            .collect();

        let mut resolved = Vec::with_capacity(cleared.len());
        for key in cleared {
            active.remove(&key);
            log_resilience!(info, "Resilience alert resolved", service: key.0, kind: key.1);
            resolved.push(ResolvedAlert {
                service: key.0,
                kind: key.1,
            });
        }

        (raised, resolved)
    }
}
