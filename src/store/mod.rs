//! # Entity Store Trait
//!
//! Statically typed registry for single-entity mutations. The convenience
//! operations on [`TransactionManager`](crate::TransactionManager) address
//! entities through this trait, so the entity is resolved at compile time
//! rather than by string lookup against the driver.

pub mod json;

use async_trait::async_trait;

use crate::classify::WorkError;
use crate::driver::Driver;
use crate::options::RecordId;

pub use json::JsonStore;

/// Single-entity mutation surface over a driver's transaction handle.
///
/// `Draft` and `Patch` are `Clone` because a retried transaction re-runs
/// the mutation from scratch with a fresh handle.
#[async_trait]
pub trait EntityStore<D: Driver>: Send + Sync {
    /// Full record as stored.
    type Record: Send + 'static;
    /// Payload for inserts.
    type Draft: Send + Sync + Clone + 'static;
    /// Payload for partial updates.
    type Patch: Send + Sync + Clone + 'static;

    /// Entity name, for metadata and log correlation.
    fn entity_name(&self) -> &str;

    /// Insert one record.
    async fn insert(&self, tx: &mut D::Tx, draft: Self::Draft) -> Result<Self::Record, WorkError>;

    /// Update one record by primary key.
    async fn update(
        &self,
        tx: &mut D::Tx,
        id: &RecordId,
        patch: Self::Patch,
    ) -> Result<Self::Record, WorkError>;

    /// Delete one record by primary key, returning it.
    async fn delete(&self, tx: &mut D::Tx, id: &RecordId) -> Result<Self::Record, WorkError>;
}
