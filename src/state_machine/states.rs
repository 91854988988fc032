use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a pipeline entity (collect → process → publish)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Entity record exists, collection not started
    Created,
    /// Collector is fetching the source post
    Collecting,
    /// Source content captured
    Collected,
    /// LLM enrichment in progress
    Processing,
    /// Summary and topic assigned
    Processed,
    /// Being pushed to the CMS
    Publishing,
    /// Live in the CMS
    Published,
    /// A stage failed; retryable
    Failed,
    /// Retired, no further transitions
    Archived,
}

impl EntityState {
    pub const ALL: [EntityState; 9] = [
        Self::Created,
        Self::Collecting,
        Self::Collected,
        Self::Processing,
        Self::Processed,
        Self::Publishing,
        Self::Published,
        Self::Failed,
        Self::Archived,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }

    /// Check if a pipeline stage is actively working on the entity
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Collecting | Self::Processing | Self::Publishing)
    }

    /// Check if this is an error state that may allow recovery
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// States an entity may enter the pipeline in
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::Created | Self::Collecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Collecting => "collecting",
            Self::Collected => "collected",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "collecting" => Ok(Self::Collecting),
            "collected" => Ok(Self::Collected),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "publishing" => Ok(Self::Publishing),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid entity state: {s}")),
        }
    }
}

/// Default state for new entities
impl Default for EntityState {
    fn default() -> Self {
        Self::Created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_and_transient_states() {
        assert!(EntityState::Archived.is_terminal());
        assert!(!EntityState::Failed.is_terminal());
        assert!(!EntityState::Published.is_terminal());

        let transient: Vec<_> = EntityState::ALL
            .iter()
            .filter(|s| s.is_transient())
            .collect();
        assert_eq!(
            transient,
            vec![
                &EntityState::Collecting,
                &EntityState::Processing,
                &EntityState::Publishing
            ]
        );
    }

    #[test]
    fn test_state_string_conversion() {
        for state in EntityState::ALL {
            assert_eq!(state.to_string().parse::<EntityState>().unwrap(), state);
        }
        assert_eq!("PROCESSED".parse::<EntityState>().unwrap(), EntityState::Processed);
        assert!("pending".parse::<EntityState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&EntityState::Publishing).unwrap();
        assert_eq!(json, "\"publishing\"");

        let parsed: EntityState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, EntityState::Publishing);
    }
}
