//! # State Validator
//!
//! Pure rule set for pipeline entities: the legal transition graph and the per-state
//! data-completeness rules. Nothing here touches storage.
//!
//! ```text
//! Created     -> {Collecting, Failed}
//! Collecting  -> {Collected, Failed}
//! Collected   -> {Processing, Failed}
//! Processing  -> {Processed, Failed}
//! Processed   -> {Publishing, Failed}
//! Publishing  -> {Published, Failed}
//! Published   -> {Archived}
//! Failed      -> {Collecting, Processing, Publishing}
//! Archived    -> {}
//! ```

use super::states::EntityState;
use crate::models::{fields, EntityRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A missing or empty field required by the entity's current state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyViolation {
    pub state: EntityState,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (state {})", self.message, self.state)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StateValidator;

impl StateValidator {
    /// Legal successor states of `from`
    pub fn valid_transitions(from: EntityState) -> &'static [EntityState] {
        use EntityState::*;
        match from {
            Created => &[Collecting, Failed],
            Collecting => &[Collected, Failed],
            Collected => &[Processing, Failed],
            Processing => &[Processed, Failed],
            Processed => &[Publishing, Failed],
            Publishing => &[Published, Failed],
            Published => &[Archived],
            Failed => &[Collecting, Processing, Publishing],
            Archived => &[],
        }
    }

    pub fn is_valid_transition(from: EntityState, to: EntityState) -> bool {
        Self::valid_transitions(from).contains(&to)
    }

    /// Completeness violations for the entity's current state
    ///
    /// An empty result means the entity carries every field its state promises.
    pub fn validate_entity_consistency(entity: &EntityRecord) -> Vec<ConsistencyViolation> {
        let state = entity.status;
        let mut violations = Vec::new();
        let mut require = |field: &str, message: &str| {
            violations.push(ConsistencyViolation {
                state,
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        match state {
            EntityState::Collected | EntityState::Processing => {
                if !entity.has_field(fields::TITLE) {
                    require(fields::TITLE, "missing title");
                }
                if !entity.has_field(fields::CONTENT) && !entity.has_field(fields::URL) {
                    require(fields::CONTENT, "missing content and url");
                }
            }
            EntityState::Processed | EntityState::Publishing => {
                if !entity.has_field(fields::SUMMARY) {
                    require(fields::SUMMARY, "missing AI summary");
                }
                if !entity.has_field(fields::TOPIC) {
                    require(fields::TOPIC, "missing topic tag");
                }
            }
            EntityState::Published => {
                if !entity.has_field(fields::EXTERNAL_URL) {
                    require(fields::EXTERNAL_URL, "missing published URL");
                }
                if !entity.has_field(fields::PUBLISHED_AT) {
                    require(fields::PUBLISHED_AT, "missing published timestamp");
                }
            }
            _ => {}
        }

        violations
    }

    /// Rollback target for an entity stuck in a transient state
    pub fn stuck_recovery_target(state: EntityState) -> Option<EntityState> {
        match state {
            EntityState::Collecting => Some(EntityState::Collected),
            EntityState::Processing => Some(EntityState::Collected),
            EntityState::Publishing => Some(EntityState::Processed),
            _ => None,
        }
    }

    /// Rollback target for an entity whose data does not support its state
    pub fn incomplete_recovery_target(state: EntityState) -> Option<EntityState> {
        match state {
            EntityState::Processed => Some(EntityState::Collected),
            EntityState::Published => Some(EntityState::Processed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(state: EntityState) -> EntityRecord {
        EntityRecord::new("post", "p-1", state, Utc::now())
    }

    #[test]
    fn test_failed_reenters_active_stages_only() {
        assert!(StateValidator::is_valid_transition(
            EntityState::Failed,
            EntityState::Processing
        ));
        assert!(!StateValidator::is_valid_transition(
            EntityState::Failed,
            EntityState::Published
        ));
        assert!(!StateValidator::is_valid_transition(
            EntityState::Failed,
            EntityState::Created
        ));
    }

    #[test]
    fn test_archived_is_terminal_in_graph() {
        assert!(StateValidator::valid_transitions(EntityState::Archived).is_empty());
        for state in EntityState::ALL {
            assert!(!StateValidator::is_valid_transition(EntityState::Archived, state));
        }
    }

    #[test]
    fn test_published_cannot_fail() {
        assert!(!StateValidator::is_valid_transition(
            EntityState::Published,
            EntityState::Failed
        ));
    }

    #[test]
    fn test_collected_requires_title_and_content_or_url() {
        let violations = StateValidator::validate_entity_consistency(&record(EntityState::Collected));
        let missing: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(missing, vec!["title", "content"]);

        let complete = record(EntityState::Collected)
            .with_field(fields::TITLE, "Rust 2.0 announced")
            .with_field(fields::URL, "https://example.com/post");
        assert!(StateValidator::validate_entity_consistency(&complete).is_empty());
    }

    #[test]
    fn test_processed_requires_summary_and_topic() {
        let entity = record(EntityState::Processed)
            .with_field(fields::TITLE, "t")
            .with_field(fields::TOPIC, "programming");
        let violations = StateValidator::validate_entity_consistency(&entity);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, fields::SUMMARY);
        assert_eq!(violations[0].to_string(), "missing AI summary (state processed)");
    }

    #[test]
    fn test_published_requires_url_and_timestamp() {
        let entity = record(EntityState::Published).with_field(fields::EXTERNAL_URL, "https://blog/x");
        let violations = StateValidator::validate_entity_consistency(&entity);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, fields::PUBLISHED_AT);
    }

    #[test]
    fn test_states_without_rules_are_always_consistent() {
        for state in [
            EntityState::Created,
            EntityState::Collecting,
            EntityState::Failed,
            EntityState::Archived,
        ] {
            assert!(StateValidator::validate_entity_consistency(&record(state)).is_empty());
        }
    }

    #[test]
    fn test_recovery_targets() {
        assert_eq!(
            StateValidator::stuck_recovery_target(EntityState::Processing),
            Some(EntityState::Collected)
        );
        assert_eq!(
            StateValidator::stuck_recovery_target(EntityState::Publishing),
            Some(EntityState::Processed)
        );
        assert_eq!(StateValidator::stuck_recovery_target(EntityState::Collected), None);
        assert_eq!(
            StateValidator::incomplete_recovery_target(EntityState::Processed),
            Some(EntityState::Collected)
        );
    }
}
