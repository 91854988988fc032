use super::states::EntityState;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by the state tracker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateTrackerError {
    /// The transition is not in the legal transition graph; nothing was recorded
    #[error("Invalid state transition for {entity_type} {entity_id}: {from} -> {to}")]
    InvalidTransition {
        entity_type: String,
        entity_id: String,
        from: EntityState,
        to: EntityState,
    },

    /// The caller's view of the current state is stale (another writer moved the entity)
    #[error(
        "Concurrent modification of {entity_type} {entity_id}: expected {expected:?}, found {actual}"
    )]
    StateConflict {
        entity_type: String,
        entity_id: String,
        expected: Option<EntityState>,
        actual: EntityState,
    },

    #[error("Entity not found: {entity_type} {entity_id}")]
    EntityNotFound {
        entity_type: String,
        entity_id: String,
    },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),
}

impl StateTrackerError {
    /// Programming/data errors that must not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::EntityNotFound { .. }
        )
    }
}

pub type StateTrackerResult<T> = Result<T, StateTrackerError>;

/// Helper to build an invalid-transition error
pub fn invalid_transition(
    entity_type: &str,
    entity_id: &str,
    from: EntityState,
    to: EntityState,
) -> StateTrackerError {
    StateTrackerError::InvalidTransition {
        entity_type: entity_type.to_string(),
        entity_id: entity_id.to_string(),
        from,
        to,
    }
}
