use super::states::EntityState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Kind of change recorded for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Validated lifecycle transition
    Transition,
    /// Field changes without a lifecycle move
    Update,
    /// Operator or pipeline initiated step back
    Rollback,
    /// Reconciliation repair of an inconsistent or stuck entity
    Recovery,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition => write!(f, "transition"),
            Self::Update => write!(f, "update"),
            Self::Rollback => write!(f, "rollback"),
            Self::Recovery => write!(f, "recovery"),
        }
    }
}

/// A requested state change, as passed to `StateTracker::track_state_change`
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub entity_type: String,
    pub entity_id: String,
    pub change_kind: ChangeKind,
    pub from_state: Option<EntityState>,
    pub to_state: Option<EntityState>,
    pub changed_fields: Map<String, Value>,
    pub metadata: Map<String, Value>,
    pub service_name: String,
}

impl StateChange {
    /// A lifecycle transition `from -> to`
    pub fn transition(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        from: EntityState,
        to: EntityState,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            change_kind: ChangeKind::Transition,
            from_state: Some(from),
            to_state: Some(to),
            changed_fields: Map::new(),
            metadata: Map::new(),
            service_name: service_name.into(),
        }
    }

    /// Any change kind with explicit optional states
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        change_kind: ChangeKind,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            change_kind,
            from_state: None,
            to_state: None,
            changed_fields: Map::new(),
            metadata: Map::new(),
            service_name: service_name.into(),
        }
    }

    pub fn from_state(mut self, state: EntityState) -> Self {
        self.from_state = Some(state);
        self
    }

    pub fn to_state(mut self, state: EntityState) -> Self {
        self.to_state = Some(state);
        self
    }

    pub fn changed_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.changed_fields.insert(name.to_string(), value.into());
        self
    }

    pub fn metadata(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(name.to_string(), value.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }
}

/// Immutable audit record of one state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeEvent {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub change_kind: ChangeKind,
    pub from_state: Option<EntityState>,
    pub to_state: Option<EntityState>,
    #[serde(default)]
    pub changed_fields: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
}

impl StateChangeEvent {
    pub fn from_change(change: StateChange, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: change.entity_type,
            entity_id: change.entity_id,
            change_kind: change.change_kind,
            from_state: change.from_state,
            to_state: change.to_state,
            changed_fields: change.changed_fields,
            metadata: change.metadata,
            timestamp,
            service_name: change.service_name,
        }
    }
}

/// Point-in-time capture of an entity, for audit and debugging only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub state: EntityState,
    pub fields: Map<String, Value>,
    pub captured_at: DateTime<Utc>,
    pub reason: Option<String>,
}
