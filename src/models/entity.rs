//! # Pipeline Entity Model
//!
//! Authoritative record of a pipeline work item (typically a collected Reddit post).
//!
//! The record is owned by the persistent store; the state tracker only reads its field
//! set for consistency checks and writes its `status` column. Everything the pipeline
//! stages produce (title, content, summary, CMS URL, ...) lives in the free-form
//! `fields` map so this core stays independent of the post schema.
//!
//! ## Database Schema
//!
//! Maps to the `pipeline_entities` table:
//! ```sql
//! CREATE TABLE pipeline_entities (
//!   entity_type TEXT NOT NULL,
//!   entity_id   TEXT NOT NULL,
//!   status      TEXT NOT NULL,
//!   fields      JSONB NOT NULL DEFAULT '{}',
//!   created_at  TIMESTAMPTZ NOT NULL,
//!   updated_at  TIMESTAMPTZ NOT NULL,
//!   PRIMARY KEY (entity_type, entity_id)
//! );
//! ```

use crate::state_machine::EntityState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known field names inspected by consistency rules
pub mod fields {
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
    pub const URL: &str = "url";
    pub const SUMMARY: &str = "summary";
    pub const TOPIC: &str = "topic";
    pub const EXTERNAL_URL: &str = "external_url";
    pub const PUBLISHED_AT: &str = "published_at";
}

/// Entity type used for collected posts
pub const POST_ENTITY_TYPE: &str = "post";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_type: String,
    pub entity_id: String,
    pub status: EntityState,
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        status: EntityState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            status,
            fields: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Whether `name` holds a meaningful value
    ///
    /// Null, blank strings and empty arrays/objects count as missing.
    pub fn has_field(&self, name: &str) -> bool {
        match self.fields.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }

    /// Composite key `entity_type:entity_id`
    pub fn key(&self) -> String {
        entity_key(&self.entity_type, &self.entity_id)
    }
}

pub fn entity_key(entity_type: &str, entity_id: &str) -> String {
    format!("{entity_type}:{entity_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_has_field_treats_blank_values_as_missing() {
        let record = EntityRecord::new("post", "p-1", EntityState::Collected, Utc::now())
            .with_field(fields::TITLE, "  ")
            .with_field(fields::CONTENT, Value::Null)
            .with_field(fields::URL, "https://reddit.com/r/rust/1")
            .with_field("tags", json!([]))
            .with_field("score", 42);

        assert!(!record.has_field(fields::TITLE));
        assert!(!record.has_field(fields::CONTENT));
        assert!(!record.has_field("tags"));
        assert!(!record.has_field(fields::SUMMARY));
        assert!(record.has_field(fields::URL));
        assert!(record.has_field("score"));
    }

    #[test]
    fn test_entity_key() {
        let record = EntityRecord::new("post", "post-42", EntityState::Created, Utc::now());
        assert_eq!(record.key(), "post:post-42");
    }
}
