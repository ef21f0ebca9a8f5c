//! In-memory driver backed by JSON document tables.
//!
//! This is the reference implementation of [`Driver`]. Transactions take a
//! copy of the table map at `begin` and write it back at `commit`, so
//! rollback is real: a dropped transaction leaves the committed state
//! untouched, and a multi-step batch is all-or-nothing.
//!
//! ## Limitations
//!
//! - **No isolation**: `set_isolation` records the requested level on the
//!   handle but concurrent transactions see last-commit-wins semantics.
//! - **No foreign keys**: only unique constraints are enforced.
//!
//! Use this driver for testing retry/rollback behavior and for embedding
//! where persistence is not needed. Commit faults can be scripted to
//! simulate transient failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::classify::DriverError;
use crate::options::{IsolationLevel, RecordId};

use super::Driver;

// ============================================================================
// MemoryDriver
// ============================================================================

/// In-memory JSON document storage with copy-on-begin transactions.
#[derive(Clone)]
pub struct MemoryDriver {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    tables: RwLock<HashMap<String, Table>>,
    next_record_id: AtomicU64,
    /// Errors to surface on upcoming commits, front first. Scripted by
    /// tests to simulate deadlocks and dropped connections.
    commit_faults: Mutex<VecDeque<DriverError>>,
}

#[derive(Clone, Default)]
struct Table {
    rows: HashMap<RecordId, Value>,
    unique_fields: Vec<String>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(HashMap::new()),
                next_record_id: AtomicU64::new(1),
                commit_faults: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Register a table. `unique_fields` are enforced on insert and update.
    pub fn create_table(&self, name: impl Into<String>, unique_fields: &[&str]) {
        let table = Table {
            rows: HashMap::new(),
            unique_fields: unique_fields.iter().map(|s| s.to_string()).collect(),
        };
        self.inner.tables.write().insert(name.into(), table);
    }

    /// Queue an error for the next commit. Faults fire front-first, one per
    /// commit, then commits succeed again.
    pub fn inject_commit_fault(&self, err: DriverError) {
        self.inner.commit_faults.lock().push_back(err);
    }

    /// Committed row count, bypassing any open transaction.
    pub fn row_count(&self, table: &str) -> usize {
        self.inner
            .tables
            .read()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Committed view of a single row.
    pub fn committed(&self, table: &str, id: &RecordId) -> Option<Value> {
        self.inner.tables.read().get(table)?.rows.get(id).cloned()
    }
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// Transaction handle: a private working copy of every table.
pub struct MemoryTx {
    inner: Arc<MemoryInner>,
    tables: HashMap<String, Table>,
    isolation: Option<IsolationLevel>,
}

impl MemoryTx {
    /// The isolation level applied to this transaction, if any.
    pub fn isolation(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Insert a JSON object, assigning a numeric `id` field. Fails with a
    /// 23505 SQLSTATE when a unique field collides.
    pub fn insert(&mut self, table: &str, mut doc: Value) -> Result<Value, DriverError> {
        if !doc.is_object() {
            return Err(DriverError::Validation(format!(
                "insert into {table}: document must be a JSON object"
            )));
        }
        let t = table_mut(&mut self.tables, table)?;
        check_unique(t, &doc, None)?;

        let id = self.inner.next_record_id.fetch_add(1, Ordering::Relaxed) as i64;
        doc["id"] = Value::from(id);
        t.rows.insert(RecordId::Num(id), doc.clone());
        Ok(doc)
    }

    /// Read a row from this transaction's view.
    pub fn get(&self, table: &str, id: &RecordId) -> Option<&Value> {
        self.tables.get(table)?.rows.get(id)
    }

    /// Merge `patch` fields into an existing row. Fails with `NotFound`
    /// when the row does not exist.
    pub fn update(&mut self, table: &str, id: &RecordId, patch: Value) -> Result<Value, DriverError> {
        let Some(patch) = patch.as_object().cloned() else {
            return Err(DriverError::Validation(format!(
                "update {table}/{id}: patch must be a JSON object"
            )));
        };
        let t = table_mut(&mut self.tables, table)?;
        if !t.rows.contains_key(id) {
            return Err(DriverError::NotFound(format!("{table}/{id}")));
        }

        let mut updated = t.rows[id].clone();
        for (k, v) in patch {
            updated[k.as_str()] = v;
        }
        check_unique(t, &updated, Some(id))?;
        t.rows.insert(id.clone(), updated.clone());
        Ok(updated)
    }

    /// Remove a row, returning it. Fails with `NotFound` when absent.
    pub fn delete(&mut self, table: &str, id: &RecordId) -> Result<Value, DriverError> {
        let t = table_mut(&mut self.tables, table)?;
        t.rows
            .remove(id)
            .ok_or_else(|| DriverError::NotFound(format!("{table}/{id}")))
    }
}

fn table_mut<'t>(
    tables: &'t mut HashMap<String, Table>,
    name: &str,
) -> Result<&'t mut Table, DriverError> {
    tables
        .get_mut(name)
        .ok_or_else(|| DriverError::Validation(format!("no such entity: {name}")))
}

fn check_unique(table: &Table, doc: &Value, exclude: Option<&RecordId>) -> Result<(), DriverError> {
    for field in &table.unique_fields {
        let Some(candidate) = doc.get(field) else { continue };
        let collision = table
            .rows
            .iter()
            .filter(|(id, _)| exclude != Some(id))
            .any(|(_, row)| row.get(field) == Some(candidate));
        if collision {
            return Err(DriverError::Sqlstate {
                code: "23505".into(),
                message: format!("duplicate key value violates unique constraint on {field}"),
                field: Some(field.clone()),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Driver impl
// ============================================================================

#[async_trait]
impl Driver for MemoryDriver {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, DriverError> {
        Ok(MemoryTx {
            inner: Arc::clone(&self.inner),
            tables: self.inner.tables.read().clone(),
            isolation: None,
        })
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), DriverError> {
        if let Some(fault) = self.inner.commit_faults.lock().pop_front() {
            // The working copy is discarded, same as a backend abort.
            return Err(fault);
        }
        *self.inner.tables.write() = tx.tables;
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<(), DriverError> {
        drop(tx);
        Ok(())
    }

    async fn set_isolation(
        &self,
        tx: &mut MemoryTx,
        level: IsolationLevel,
    ) -> Result<(), DriverError> {
        tx.isolation = Some(level);
        Ok(())
    }

    // No SQL dialect to speak.
    fn isolation_statement(&self, _level: IsolationLevel) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_commit_visible() {
        let db = MemoryDriver::new();
        db.create_table("user", &[]);

        let mut tx = db.begin().await.unwrap();
        let row = tx.insert("user", json!({"name": "Ada"})).unwrap();
        let id = RecordId::Num(row["id"].as_i64().unwrap());
        db.commit(tx).await.unwrap();

        assert_eq!(db.committed("user", &id).unwrap()["name"], "Ada");
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = MemoryDriver::new();
        db.create_table("user", &[]);

        let mut tx = db.begin().await.unwrap();
        tx.insert("user", json!({"name": "Ada"})).unwrap();
        db.rollback(tx).await.unwrap();

        assert_eq!(db.row_count("user"), 0);
    }

    #[tokio::test]
    async fn test_unique_constraint_sqlstate() {
        let db = MemoryDriver::new();
        db.create_table("user", &["email"]);

        let mut tx = db.begin().await.unwrap();
        tx.insert("user", json!({"email": "ada@example.com"})).unwrap();
        let err = tx.insert("user", json!({"email": "ada@example.com"})).unwrap_err();

        match err {
            DriverError::Sqlstate { code, field, .. } => {
                assert_eq!(code, "23505");
                assert_eq!(field.as_deref(), Some("email"));
            }
            other => panic!("expected sqlstate error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_missing_row_not_found() {
        let db = MemoryDriver::new();
        db.create_table("user", &[]);

        let mut tx = db.begin().await.unwrap();
        let err = tx
            .update("user", &RecordId::Num(99), json!({"name": "x"}))
            .unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_keeps_other_fields() {
        let db = MemoryDriver::new();
        db.create_table("user", &[]);

        let mut tx = db.begin().await.unwrap();
        let row = tx.insert("user", json!({"name": "Ada", "age": 3})).unwrap();
        let id = RecordId::Num(row["id"].as_i64().unwrap());
        let updated = tx.update("user", &id, json!({"age": 4})).unwrap();

        assert_eq!(updated["name"], "Ada");
        assert_eq!(updated["age"], 4);
    }

    #[tokio::test]
    async fn test_commit_fault_fires_once() {
        let db = MemoryDriver::new();
        db.create_table("user", &[]);
        db.inject_commit_fault(DriverError::Other("deadlock detected".into()));

        let mut tx = db.begin().await.unwrap();
        tx.insert("user", json!({"name": "Ada"})).unwrap();
        assert!(db.commit(tx).await.is_err());
        assert_eq!(db.row_count("user"), 0);

        // next commit is clean
        let mut tx = db.begin().await.unwrap();
        tx.insert("user", json!({"name": "Ada"})).unwrap();
        db.commit(tx).await.unwrap();
        assert_eq!(db.row_count("user"), 1);
    }

    #[tokio::test]
    async fn test_set_isolation_recorded() {
        let db = MemoryDriver::new();
        let mut tx = db.begin().await.unwrap();
        db.set_isolation(&mut tx, IsolationLevel::Serializable)
            .await
            .unwrap();
        assert_eq!(tx.isolation(), Some(IsolationLevel::Serializable));
    }
}
