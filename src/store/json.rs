//! JSON document store over the in-memory driver.

use async_trait::async_trait;

use serde_json::Value;

use crate::classify::WorkError;
use crate::driver::{MemoryDriver, MemoryTx};
use crate::options::RecordId;

use super::EntityStore;

/// An [`EntityStore`] whose records are raw JSON documents in one
/// [`MemoryDriver`] table. Useful for tests and for embedding without a
/// schema.
#[derive(Debug, Clone)]
pub struct JsonStore {
    entity: String,
}

impl JsonStore {
    pub fn new(entity: impl Into<String>) -> Self {
        Self { entity: entity.into() }
    }
}

#[async_trait]
impl EntityStore<MemoryDriver> for JsonStore {
    type Record = Value;
    type Draft = Value;
    type Patch = Value;

    fn entity_name(&self) -> &str {
        &self.entity
    }

    async fn insert(&self, tx: &mut MemoryTx, draft: Value) -> Result<Value, WorkError> {
        Ok(tx.insert(&self.entity, draft)?)
    }

    async fn update(
        &self,
        tx: &mut MemoryTx,
        id: &RecordId,
        patch: Value,
    ) -> Result<Value, WorkError> {
        Ok(tx.update(&self.entity, id, patch)?)
    }

    async fn delete(&self, tx: &mut MemoryTx, id: &RecordId) -> Result<Value, WorkError> {
        Ok(tx.delete(&self.entity, id)?)
    }
}
