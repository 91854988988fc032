//! # Pipeline Configuration
//!
//! Strongly typed configuration for the resilience and state-tracking core, loaded from
//! `config/pipeline.toml` with environment overrides (see [`ConfigManager`]).
//!
//! Every section is defaulted, so an empty file yields the production presets:
//!
//! ```toml
//! [store]
//! backend = "redis"
//! redis_url = "redis://localhost:6379"
//!
//! [resilience.services.reddit]
//! failure_threshold = 3
//! recovery_timeout_seconds = 120.0
//! success_threshold = 2
//! call_timeout_seconds = 30.0
//! max_concurrent = 5
//! queue_capacity = 20
//!
//! [rate_limits.reddit]
//! max_requests = 60
//! window_seconds = 60
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pipeline_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().monitor.interval();
//! # let _ = interval;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::{retention, stuck_thresholds};
use crate::resilience::{RateLimitConfig, ServiceIdentity, ServiceResilienceConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store: StoreConfig,
    pub resilience: ResilienceConfig,
    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<ServiceIdentity, RateLimitConfig>,
    pub monitor: MonitorConfig,
    pub state_tracker: StateTrackerConfig,
}

fn default_rate_limits() -> BTreeMap<ServiceIdentity, RateLimitConfig> {
    BTreeMap::from([(ServiceIdentity::Reddit, RateLimitConfig::default())])
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            resilience: ResilienceConfig::default(),
            rate_limits: default_rate_limits(),
            monitor: MonitorConfig::default(),
            state_tracker: StateTrackerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject configurations the components cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        self.store.validate()?;

        for (service, config) in &self.resilience.services {
            config.validate().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("resilience.services.{service}"),
                    format!("{config:?}"),
                    reason,
                )
            })?;
        }

        for (service, limit) in &self.rate_limits {
            limit.validate().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("rate_limits.{service}"),
                    format!("{limit:?}"),
                    reason,
                )
            })?;
        }

        self.monitor.validate()?;
        self.state_tracker.validate()?;
        Ok(())
    }

    /// Resilience settings for `service`, if it is configured
    pub fn service(&self, service: ServiceIdentity) -> Option<&ServiceResilienceConfig> {
        self.resilience.services.get(&service)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityBackend {
    #[default]
    Memory,
    Postgres,
}

/// Backing stores for shared state and entity records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
    pub entity_backend: EntityBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub circuit_state_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            entity_backend: EntityBackend::Memory,
            database_url: None,
            max_connections: 10,
            circuit_state_ttl_seconds: retention::CIRCUIT_STATE_TTL.as_secs(),
        }
    }
}

impl StoreConfig {
    pub fn circuit_state_ttl(&self) -> Duration {
        Duration::from_secs(self.circuit_state_ttl_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.backend == StoreBackend::Redis && self.redis_url.is_none() {
            return Err(ConfigurationError::invalid_value(
                "store.redis_url",
                "<unset>",
                "required when store.backend = \"redis\"",
            ));
        }

        if self.entity_backend == EntityBackend::Postgres && self.database_url.is_none() {
            return Err(ConfigurationError::invalid_value(
                "store.database_url",
                "<unset>",
                "required when store.entity_backend = \"postgres\"",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "store.max_connections",
                "0",
                "must be greater than 0",
            ));
        }

        if self.circuit_state_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "store.circuit_state_ttl_seconds",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Per-service breaker and bulkhead table
///
/// Only services listed here are guarded; calls for any other service run unwrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub services: BTreeMap<ServiceIdentity, ServiceResilienceConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            services: ServiceIdentity::ALL
                .into_iter()
                .map(|service| (service, ServiceResilienceConfig::for_service(service)))
                .collect(),
        }
    }
}

/// Sampling and alerting settings for the resilience monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_seconds: u64,
    pub metrics_window_seconds: u64,
    pub history_retention_hours: u64,
    pub alert_ttl_seconds: u64,
    pub queue_utilization_threshold: f64,
    pub failure_rate_threshold: f64,
    pub response_time_threshold_seconds: f64,
    pub min_samples_for_rates: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 60,
            metrics_window_seconds: retention::CALL_SAMPLE_WINDOW.as_secs(),
            history_retention_hours: retention::METRICS_HISTORY_WINDOW.as_secs() / 3600,
            alert_ttl_seconds: retention::ALERT_TTL.as_secs(),
            queue_utilization_threshold: 0.9,
            failure_rate_threshold: 0.5,
            response_time_threshold_seconds: 5.0,
            min_samples_for_rates: 1,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn metrics_window(&self) -> Duration {
        Duration::from_secs(self.metrics_window_seconds)
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_hours * 3600)
    }

    pub fn alert_ttl(&self) -> Duration {
        Duration::from_secs(self.alert_ttl_seconds)
    }

    pub fn response_time_threshold_ms(&self) -> f64 {
        self.response_time_threshold_seconds * 1000.0
    }

    fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("monitor.interval_seconds", self.interval_seconds),
            ("monitor.metrics_window_seconds", self.metrics_window_seconds),
            ("monitor.history_retention_hours", self.history_retention_hours),
            ("monitor.alert_ttl_seconds", self.alert_ttl_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be greater than 0",
                ));
            }
        }

        for (field, ratio) in [
            ("monitor.queue_utilization_threshold", self.queue_utilization_threshold),
            ("monitor.failure_rate_threshold", self.failure_rate_threshold),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    ratio.to_string(),
                    "must be within (0, 1]",
                ));
            }
        }

        if !self.response_time_threshold_seconds.is_finite()
            || self.response_time_threshold_seconds <= 0.0
        {
            return Err(ConfigurationError::invalid_value(
                "monitor.response_time_threshold_seconds",
                self.response_time_threshold_seconds.to_string(),
                "must be a positive number of seconds",
            ));
        }
        Ok(())
    }
}

/// Retention and reconciliation settings for the state tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateTrackerConfig {
    pub history_limit: usize,
    pub event_ttl_hours: u64,
    pub snapshot_ttl_hours: u64,
    pub collecting_timeout_minutes: u64,
    pub processing_timeout_minutes: u64,
    pub publishing_timeout_minutes: u64,
    pub reconcile_interval_seconds: u64,
}

impl Default for StateTrackerConfig {
    fn default() -> Self {
        Self {
            history_limit: retention::STATE_HISTORY_LIMIT,
            event_ttl_hours: retention::STATE_EVENT_TTL.as_secs() / 3600,
            snapshot_ttl_hours: retention::STATE_EVENT_TTL.as_secs() / 3600,
            collecting_timeout_minutes: stuck_thresholds::COLLECTING.as_secs() / 60,
            processing_timeout_minutes: stuck_thresholds::PROCESSING.as_secs() / 60,
            publishing_timeout_minutes: stuck_thresholds::PUBLISHING.as_secs() / 60,
            reconcile_interval_seconds: 300,
        }
    }
}

impl StateTrackerConfig {
    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl_hours * 3600)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_hours * 3600)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    /// How long an entity may sit in a transient state before it counts as stuck
    pub fn stuck_threshold(&self, state: crate::state_machine::EntityState) -> Option<Duration> {
        use crate::state_machine::EntityState;

        let minutes = match state {
            EntityState::Collecting => self.collecting_timeout_minutes,
            EntityState::Processing => self.processing_timeout_minutes,
            EntityState::Publishing => self.publishing_timeout_minutes,
            _ => return None,
        };
        Some(Duration::from_secs(minutes * 60))
    }

    fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("state_tracker.history_limit", self.history_limit as u64),
            ("state_tracker.event_ttl_hours", self.event_ttl_hours),
            ("state_tracker.snapshot_ttl_hours", self.snapshot_ttl_hours),
            ("state_tracker.collecting_timeout_minutes", self.collecting_timeout_minutes),
            ("state_tracker.processing_timeout_minutes", self.processing_timeout_minutes),
            ("state_tracker.publishing_timeout_minutes", self.publishing_timeout_minutes),
            ("state_tracker.reconcile_interval_seconds", self.reconcile_interval_seconds),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    "0",
                    "must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::EntityState;

    #[test]
    fn test_defaults_cover_every_service_and_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resilience.services.len(), ServiceIdentity::ALL.len());
        assert_eq!(
            config.service(ServiceIdentity::Reddit).map(|c| c.failure_threshold),
            Some(3)
        );
        assert_eq!(config.rate_limits[&ServiceIdentity::Reddit].max_requests, 60);
    }

    #[test]
    fn test_stuck_thresholds() {
        let config = StateTrackerConfig::default();
        assert_eq!(
            config.stuck_threshold(EntityState::Processing),
            Some(Duration::from_secs(2 * 3600))
        );
        assert_eq!(
            config.stuck_threshold(EntityState::Publishing),
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(config.stuck_threshold(EntityState::Collected), None);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.monitor.failure_rate_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "monitor.failure_rate_threshold"
        ));

        let mut config = PipelineConfig::default();
        if let Some(reddit) = config.resilience.services.get_mut(&ServiceIdentity::Reddit) {
            reddit.max_concurrent = 0;
        }
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.store.backend = StoreBackend::Redis;
        assert!(config.validate().is_err());
    }
}
