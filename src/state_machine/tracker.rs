//! # State Tracker
//!
//! Records lifecycle changes of pipeline entities, answers "what state is this entity
//! in", and finds (and repairs) entities whose state is inconsistent or stuck.
//!
//! ## Write path
//!
//! For a transition `from -> to` on one entity:
//!
//! 1. Validate against the transition graph; illegal moves are rejected and nothing is
//!    recorded.
//! 2. Take the per-entity lock (serializes writers in this process).
//! 3. Compare `from` with the current-state projection.
//! 4. Conditionally write `to` to the authoritative record (`WHERE status = from`), which
//!    serializes writers across processes.
//! 5. Update the projection and append the event to the audit log.
//!
//! Failures in step 5 are returned as warnings: audit completeness is best-effort, the
//! authoritative state is not.

use super::errors::{invalid_transition, StateTrackerError, StateTrackerResult};
use super::events::{ChangeKind, EntitySnapshot, StateChange, StateChangeEvent};
use super::states::EntityState;
use super::validator::StateValidator;
use crate::clock::{elapsed_between, SharedClock};
use crate::config::StateTrackerConfig;
use crate::log_state;
use crate::models::entity_key;
use crate::store::{EntityRepository, StateEventStore, StatusUpdate, StoreHandles};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Service name stamped on events written by reconciliation
pub const RECONCILER_SERVICE: &str = "state_reconciler";

/// The recorded event plus any non-fatal persistence problems
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOutcome {
    pub event: StateChangeEvent,
    pub warnings: Vec<String>,
}

impl TrackOutcome {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// An entity whose state is not supported by its data, or that stopped moving
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inconsistency {
    pub entity_type: String,
    pub entity_id: String,
    pub current_state: EntityState,
    pub issues: Vec<String>,
    /// Rollback target under the fixed recovery policy
    pub suggested_target: Option<EntityState>,
    pub last_updated: DateTime<Utc>,
}

/// Outcome of one detect-and-recover pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub detected: usize,
    pub recovered: usize,
    /// Inconsistencies with no policy target; left for an operator
    pub skipped: usize,
    /// `(entity key, error)` for recoveries that failed
    pub failed: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct StateTracker {
    events: Arc<dyn StateEventStore>,
    entities: Arc<dyn EntityRepository>,
    clock: SharedClock,
    config: StateTrackerConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StateTracker {
    pub fn new(
        events: Arc<dyn StateEventStore>,
        entities: Arc<dyn EntityRepository>,
        clock: SharedClock,
        config: StateTrackerConfig,
    ) -> Self {
        Self {
            events,
            entities,
            clock,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn from_stores(stores: &StoreHandles, clock: SharedClock, config: StateTrackerConfig) -> Self {
        Self::new(
            Arc::clone(&stores.events),
            Arc::clone(&stores.entities),
            clock,
            config,
        )
    }

    pub fn config(&self) -> &StateTrackerConfig {
        &self.config
    }

    /// Record a state change
    ///
    /// `Transition` changes carrying both states are validated and applied conditionally
    /// on `from_state`. Other kinds that carry a `to_state` overwrite the current state.
    pub async fn track_state_change(&self, change: StateChange) -> StateTrackerResult<TrackOutcome> {
        let guarded = match (change.change_kind, change.from_state, change.to_state) {
            (ChangeKind::Transition, Some(from), Some(to)) => {
                if !StateValidator::is_valid_transition(from, to) {
                    log_state!(warn, "Rejected invalid transition",
                        entity_type: change.entity_type,
                        entity_id: change.entity_id,
                        from: from,
                        to: to,
                        caller: change.service_name
                    );
                    return Err(invalid_transition(
                        &change.entity_type,
                        &change.entity_id,
                        from,
                        to,
                    ));
                }
                Some(from)
            }
            _ => None,
        };

        let key = entity_key(&change.entity_type, &change.entity_id);
        let lock = self.entity_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.apply_change(change, guarded).await
        };
        self.release_lock(&key, lock);
        result
    }

    /// Convenience wrapper for a lifecycle transition
    pub async fn transition(
        &self,
        entity_type: &str,
        entity_id: &str,
        from: EntityState,
        to: EntityState,
        service_name: &str,
    ) -> StateTrackerResult<TrackOutcome> {
        self.track_state_change(StateChange::transition(
            entity_type,
            entity_id,
            from,
            to,
            service_name,
        ))
        .await
    }

    /// Current state: projection first, authoritative record on a miss
    pub async fn get_current_state(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StateTrackerResult<Option<EntityState>> {
        match self.events.current_state(entity_type, entity_id).await {
            Ok(Some(state)) => return Ok(Some(state)),
            Ok(None) => {}
            Err(error) => {
                debug!(
                    entity_type = entity_type,
                    entity_id = entity_id,
                    error = %error,
                    "Projection unavailable, reading authoritative record"
                );
            }
        }

        let Some(record) = self.entities.find(entity_type, entity_id).await? else {
            return Ok(None);
        };

        // Warm the projection for the next reader
        if let Err(error) = self
            .events
            .set_current_state(entity_type, entity_id, record.status, self.config.event_ttl())
            .await
        {
            debug!(entity_type = entity_type, entity_id = entity_id, error = %error, "Projection refresh failed");
        }
        Ok(Some(record.status))
    }

    /// Most recent events first
    pub async fn get_state_history(
        &self,
        entity_type: &str,
        entity_id: &str,
        limit: usize,
    ) -> StateTrackerResult<Vec<StateChangeEvent>> {
        Ok(self.events.history(entity_type, entity_id, limit).await?)
    }

    /// Scan persisted entities for incomplete data and stuck transient states
    pub async fn detect_inconsistent_states(&self) -> StateTrackerResult<Vec<Inconsistency>> {
        let candidates = self
            .entities
            .list_by_states(&[
                EntityState::Collecting,
                EntityState::Processing,
                EntityState::Processed,
                EntityState::Publishing,
                EntityState::Published,
            ])
            .await?;
        let now = self.clock.now();

        let mut inconsistencies = Vec::new();
        for record in candidates {
            let state = record.status;
            let mut issues = Vec::new();
            let mut suggested_target = None;

            if matches!(state, EntityState::Processed | EntityState::Published) {
                let violations = StateValidator::validate_entity_consistency(&record);
                if !violations.is_empty() {
                    issues.extend(violations.iter().map(|v| v.to_string()));
                    suggested_target = StateValidator::incomplete_recovery_target(state);
                }
            }

            if let Some(threshold) = self.config.stuck_threshold(state) {
                let idle = elapsed_between(record.updated_at, now);
                if idle > threshold {
                    issues.push(format!(
                        "stuck in {state} for {} minutes (limit {} minutes)",
                        idle.as_secs() / 60,
                        threshold.as_secs() / 60
                    ));
                    suggested_target = StateValidator::stuck_recovery_target(state);
                }
            }

            if !issues.is_empty() {
                inconsistencies.push(Inconsistency {
                    entity_type: record.entity_type,
                    entity_id: record.entity_id,
                    current_state: state,
                    issues,
                    suggested_target,
                    last_updated: record.updated_at,
                });
            }
        }

        if !inconsistencies.is_empty() {
            log_state!(warn, "Inconsistent entities detected", count: inconsistencies.len());
        }
        Ok(inconsistencies)
    }

    /// Move an entity to `target_state` outside the transition graph and audit it
    ///
    /// The authoritative record is written first; the `Recovery` event follows.
    pub async fn recover_inconsistent_state(
        &self,
        entity_type: &str,
        entity_id: &str,
        target_state: EntityState,
        metadata: Map<String, Value>,
    ) -> StateTrackerResult<TrackOutcome> {
        let key = entity_key(entity_type, entity_id);
        let lock = self.entity_lock(&key);
        let result = {
            let _guard = lock.lock().await;
            self.apply_recovery(entity_type, entity_id, target_state, metadata)
                .await
        };
        self.release_lock(&key, lock);
        result
    }

    /// Detect, then recover every inconsistency that has a policy target
    pub async fn recover_all(&self) -> StateTrackerResult<RecoveryReport> {
        let inconsistencies = self.detect_inconsistent_states().await?;
        let mut report = RecoveryReport {
            detected: inconsistencies.len(),
            ..RecoveryReport::default()
        };

        for inconsistency in inconsistencies {
            let Some(target) = inconsistency.suggested_target else {
                report.skipped += 1;
                continue;
            };

            let mut metadata = Map::new();
            metadata.insert("reason".to_string(), Value::from("reconciliation"));
            metadata.insert("issues".to_string(), Value::from(inconsistency.issues.clone()));

            match self
                .recover_inconsistent_state(
                    &inconsistency.entity_type,
                    &inconsistency.entity_id,
                    target,
                    metadata,
                )
                .await
            {
                Ok(_) => report.recovered += 1,
                Err(error) => {
                    let key = entity_key(&inconsistency.entity_type, &inconsistency.entity_id);
                    log_state!(error, "Entity recovery failed", entity: key, error: error.to_string());
                    report.failed.push((key, error.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Capture the entity's current record for audit and debugging
    pub async fn capture_snapshot(
        &self,
        entity_type: &str,
        entity_id: &str,
        reason: Option<String>,
    ) -> StateTrackerResult<EntitySnapshot> {
        let record = self
            .entities
            .find(entity_type, entity_id)
            .await?
            .ok_or_else(|| not_found(entity_type, entity_id))?;

        let snapshot = EntitySnapshot {
            id: Uuid::new_v4(),
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            state: record.status,
            fields: record.fields,
            captured_at: self.clock.now(),
            reason,
        };
        self.events
            .save_snapshot(&snapshot, self.config.snapshot_ttl())
            .await?;
        Ok(snapshot)
    }

    /// Retained snapshots, newest first
    pub async fn get_snapshots(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StateTrackerResult<Vec<EntitySnapshot>> {
        Ok(self.events.snapshots(entity_type, entity_id).await?)
    }

    async fn apply_change(
        &self,
        change: StateChange,
        expected: Option<EntityState>,
    ) -> StateTrackerResult<TrackOutcome> {
        let now = self.clock.now();
        let mut warnings = Vec::new();

        if let Some(to) = change.to_state {
            if let Some(expected) = expected {
                match self
                    .events
                    .current_state(&change.entity_type, &change.entity_id)
                    .await
                {
                    Ok(Some(actual)) if actual != expected => {
                        return Err(conflict(&change, Some(expected), actual));
                    }
                    Ok(_) => {}
                    Err(error) => warnings.push(format!("current-state projection unavailable: {error}")),
                }
            }

            let authoritative = match self
                .entities
                .compare_and_set_status(&change.entity_type, &change.entity_id, expected, to, now)
                .await?
            {
                StatusUpdate::Updated => true,
                StatusUpdate::Conflict { actual } => {
                    return Err(conflict(&change, expected, actual));
                }
                StatusUpdate::NotFound => {
                    warnings.push("no authoritative record; state kept in projection only".to_string());
                    false
                }
            };

            if let Err(error) = self
                .events
                .set_current_state(&change.entity_type, &change.entity_id, to, self.config.event_ttl())
                .await
            {
                if !authoritative {
                    return Err(error.into());
                }
                warnings.push(format!("current-state projection not updated: {error}"));
            }
        }

        let event = StateChangeEvent::from_change(change, now);
        if let Err(error) = self
            .events
            .append_event(&event, self.config.history_limit, self.config.event_ttl())
            .await
        {
            warnings.push(format!("state change event not recorded: {error}"));
        }

        self.log_outcome(&event, &warnings);
        Ok(TrackOutcome { event, warnings })
    }

    async fn apply_recovery(
        &self,
        entity_type: &str,
        entity_id: &str,
        target_state: EntityState,
        metadata: Map<String, Value>,
    ) -> StateTrackerResult<TrackOutcome> {
        let record = self
            .entities
            .find(entity_type, entity_id)
            .await?
            .ok_or_else(|| not_found(entity_type, entity_id))?;
        let from = record.status;
        let now = self.clock.now();

        match self
            .entities
            .compare_and_set_status(entity_type, entity_id, Some(from), target_state, now)
            .await?
        {
            StatusUpdate::Updated => {}
            StatusUpdate::Conflict { actual } => {
                return Err(StateTrackerError::StateConflict {
                    entity_type: entity_type.to_string(),
                    entity_id: entity_id.to_string(),
                    expected: Some(from),
                    actual,
                });
            }
            StatusUpdate::NotFound => return Err(not_found(entity_type, entity_id)),
        }

        let mut warnings = Vec::new();
        if let Err(error) = self
            .events
            .set_current_state(entity_type, entity_id, target_state, self.config.event_ttl())
            .await
        {
            warnings.push(format!("current-state projection not updated: {error}"));
        }

        let change = StateChange::new(entity_type, entity_id, ChangeKind::Recovery, RECONCILER_SERVICE)
            .from_state(from)
            .to_state(target_state)
            .with_metadata(metadata);
        let event = StateChangeEvent::from_change(change, now);
        if let Err(error) = self
            .events
            .append_event(&event, self.config.history_limit, self.config.event_ttl())
            .await
        {
            warnings.push(format!("recovery event not recorded: {error}"));
        }

        log_state!(info, "Entity state recovered",
            entity_type: entity_type,
            entity_id: entity_id,
            from: from,
            to: target_state
        );
        self.log_outcome(&event, &warnings);
        Ok(TrackOutcome { event, warnings })
    }

    fn log_outcome(&self, event: &StateChangeEvent, warnings: &[String]) {
        if warnings.is_empty() {
            debug!(
                entity_type = %event.entity_type,
                entity_id = %event.entity_id,
                kind = %event.change_kind,
                from = ?event.from_state,
                to = ?event.to_state,
                "State change recorded"
            );
            return;
        }

        log_state!(warn, "State change recorded with warnings",
            entity_type: event.entity_type,
            entity_id: event.entity_id,
            kind: event.change_kind,
            warnings: warnings
        );
    }

    fn entity_lock(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(key.to_string()).or_default().value())
    }

    /// Drop the lock entry once no other caller holds or awaits it
    fn release_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn conflict(change: &StateChange, expected: Option<EntityState>, actual: EntityState) -> StateTrackerError {
    StateTrackerError::StateConflict {
        entity_type: change.entity_type.clone(),
        entity_id: change.entity_id.clone(),
        expected,
        actual,
    }
}

fn not_found(entity_type: &str, entity_id: &str) -> StateTrackerError {
    StateTrackerError::EntityNotFound {
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
    }
}
