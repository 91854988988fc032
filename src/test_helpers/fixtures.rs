use crate::bootstrap::PipelineCore;
use crate::clock::ManualClock;
use crate::config::PipelineConfig;
use crate::models::EntityRecord;
use crate::state_machine::EntityState;
use crate::store::{EntityRepository, InMemoryEntityRepository, InMemoryStore, StoreHandles};
use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// In-memory pipeline core on a manual clock, with direct access to its stores
#[derive(Debug, Clone)]
pub struct TestPipeline {
    pub clock: ManualClock,
    pub store: Arc<InMemoryStore>,
    pub entities: Arc<InMemoryEntityRepository>,
    pub core: PipelineCore,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::default())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let clock = ManualClock::starting_now();
        let store = Arc::new(InMemoryStore::new(clock.shared()));
        let entities = Arc::new(InMemoryEntityRepository::new());
        let stores = StoreHandles::shared(Arc::clone(&store), entities.clone());
        let core = PipelineCore::new(config, stores, clock.shared());

        Self {
            clock,
            store,
            entities,
            core,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Insert a post in `state` carrying `fields`, stamped with the current manual time
    pub async fn seed_post(
        &self,
        entity_id: &str,
        state: EntityState,
        fields: &[(&str, Value)],
    ) -> Result<EntityRecord> {
        let record = fields.iter().fold(
            EntityRecord::new(crate::models::POST_ENTITY_TYPE, entity_id, state, self.clock.now()),
            |record, (name, value)| record.with_field(name, value.clone()),
        );
        self.entities
            .upsert(&record)
            .await
            .with_context(|| format!("Failed to seed post {entity_id}"))?;
        Ok(record)
    }

    /// Authoritative status of a post
    pub async fn post_status(&self, entity_id: &str) -> Result<EntityState> {
        let record = self
            .entities
            .find(crate::models::POST_ENTITY_TYPE, entity_id)
            .await
            .context("Entity repository read failed")?
            .with_context(|| format!("Post {entity_id} not found"))?;
        Ok(record.status)
    }
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}
