//! PostgreSQL entity repository
//!
//! Authoritative storage for pipeline entities in the `pipeline_entities` table. Status
//! writes are conditional (`WHERE status = expected`) so a concurrent writer that moved
//! the entity first is reported as a conflict instead of being overwritten.

use super::errors::{StoreError, StoreResult};
use super::traits::{EntityRepository, StatusUpdate};
use crate::models::EntityRecord;
use crate::state_machine::EntityState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PgEntityRepository {
    pool: PgPool,
}

impl PgEntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to database: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;
        debug!("Entity schema migrations applied");
        Ok(())
    }

    async fn current_status(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StoreResult<Option<EntityState>> {
        let row = sqlx::query(
            r#"
            SELECT status
            FROM pipeline_entities
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| parse_status(row.try_get("status")?)).transpose()
    }
}

fn parse_status(raw: String) -> StoreResult<EntityState> {
    raw.parse().map_err(StoreError::Serialization)
}

fn record_from_row(row: &PgRow) -> StoreResult<EntityRecord> {
    let fields: Value = row.try_get("fields")?;
    let fields = match fields {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(StoreError::Serialization(format!(
                "entity fields must be a JSON object, got {other}"
            )))
        }
    };

    Ok(EntityRecord {
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        status: parse_status(row.try_get("status")?)?,
        fields,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl EntityRepository for PgEntityRepository {
    async fn find(&self, entity_type: &str, entity_id: &str) -> StoreResult<Option<EntityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT entity_type, entity_id, status, fields, created_at, updated_at
            FROM pipeline_entities
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &EntityRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_entities (entity_type, entity_id, status, fields, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (entity_type, entity_id) DO UPDATE
            SET status = EXCLUDED.status,
                fields = EXCLUDED.fields,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(record.status.as_str())
        .bind(Value::Object(record.fields.clone()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        entity_type: &str,
        entity_id: &str,
        expected: Option<EntityState>,
        next: EntityState,
        now: DateTime<Utc>,
    ) -> StoreResult<StatusUpdate> {
        let updated = sqlx::query(
            r#"
            UPDATE pipeline_entities
            SET status = $3, updated_at = $4
            WHERE entity_type = $1
              AND entity_id = $2
              AND ($5::text IS NULL OR status = $5)
            RETURNING status
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(next.as_str())
        .bind(now)
        .bind(expected.map(|state| state.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_some() {
            return Ok(StatusUpdate::Updated);
        }

        // No row matched: either it does not exist or its status moved on
        match self.current_status(entity_type, entity_id).await? {
            Some(actual) => Ok(StatusUpdate::Conflict { actual }),
            None => Ok(StatusUpdate::NotFound),
        }
    }

    async fn list_by_states(&self, states: &[EntityState]) -> StoreResult<Vec<EntityRecord>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let statuses: Vec<&str> = states.iter().map(|state| state.as_str()).collect();
        let rows = sqlx::query(
            r#"
            SELECT entity_type, entity_id, status, fields, created_at, updated_at
            FROM pipeline_entities
            WHERE status = ANY($1)
            ORDER BY entity_type, entity_id
            "#,
        )
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

#[cfg(all(test, feature = "test-services"))]
mod tests {
    use super::*;

    async fn repository() -> Option<PgEntityRepository> {
        let url = crate::test_helpers::get_test_database_url();
        let repository = PgEntityRepository::connect(&url).await.ok()?;
        repository.migrate().await.ok()?;
        Some(repository)
    }

    #[tokio::test]
    async fn test_conditional_status_write() {
        let Some(repository) = repository().await else {
            eprintln!("Postgres unavailable, skipping");
            return;
        };
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = EntityRecord::new("post", &id, EntityState::Collected, now)
            .with_field("title", "Rust 2027 roadmap");
        repository.upsert(&record).await.unwrap();

        let first = repository
            .compare_and_set_status("post", &id, Some(EntityState::Collected), EntityState::Processing, now)
            .await
            .unwrap();
        assert_eq!(first, StatusUpdate::Updated);

        let stale = repository
            .compare_and_set_status("post", &id, Some(EntityState::Collected), EntityState::Processing, now)
            .await
            .unwrap();
        assert_eq!(
            stale,
            StatusUpdate::Conflict {
                actual: EntityState::Processing
            }
        );

        let missing = repository
            .compare_and_set_status("post", "absent", None, EntityState::Failed, now)
            .await
            .unwrap();
        assert_eq!(missing, StatusUpdate::NotFound);

        let found = repository.find("post", &id).await.unwrap().unwrap();
        assert_eq!(found.status, EntityState::Processing);
        assert!(found.has_field("title"));
    }
}
