//! # Driver Trait
//!
//! This is the contract between the transaction manager and any database
//! client. The manager owns the retry loop and classification; the driver
//! owns connections, transaction handles, and dialect.
//!
//! ## Implementations
//!
//! | Driver | Module | Description |
//! |--------|--------|-------------|
//! | `MemoryDriver` | `memory` | In-memory JSON tables for testing/embedding |

pub mod memory;

use async_trait::async_trait;

use crate::classify::DriverError;
use crate::options::IsolationLevel;

pub use memory::{MemoryDriver, MemoryTx};

/// The transaction seam a database client must expose.
///
/// The manager never holds a `Tx` across anything but the driver's own
/// calls and the caller's unit of work; connection pooling and handle
/// lifetime stay entirely on the driver's side.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// The transaction handle for this driver.
    type Tx: Send;

    /// Open a new transaction.
    async fn begin(&self) -> Result<Self::Tx, DriverError>;

    /// Commit, consuming the handle.
    async fn commit(&self, tx: Self::Tx) -> Result<(), DriverError>;

    /// Roll back, consuming the handle.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), DriverError>;

    /// Apply an isolation level to a just-opened transaction. Drivers whose
    /// backend cannot change isolation should treat this as a no-op.
    async fn set_isolation(
        &self,
        tx: &mut Self::Tx,
        level: IsolationLevel,
    ) -> Result<(), DriverError>;

    /// The dialect text for the isolation directive, or `None` when the
    /// backend has no such statement. SQL drivers send this verbatim on the
    /// open transaction from their `set_isolation`.
    fn isolation_statement(&self, level: IsolationLevel) -> Option<String> {
        Some(format!("SET TRANSACTION ISOLATION LEVEL {level}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Minimal SQL-flavored driver: `set_isolation` sends whatever
    /// `isolation_statement` supplies, recording it for inspection.
    struct RecordingSqlDriver {
        statements: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Driver for RecordingSqlDriver {
        type Tx = ();

        async fn begin(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn commit(&self, _tx: ()) -> Result<(), DriverError> {
            Ok(())
        }

        async fn rollback(&self, _tx: ()) -> Result<(), DriverError> {
            Ok(())
        }

        async fn set_isolation(
            &self,
            _tx: &mut (),
            level: IsolationLevel,
        ) -> Result<(), DriverError> {
            if let Some(stmt) = self.isolation_statement(level) {
                self.statements.lock().push(stmt);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_isolation_statement_dialect() {
        let driver = RecordingSqlDriver {
            statements: Mutex::new(Vec::new()),
        };

        let mut tx = driver.begin().await.unwrap();
        for level in [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
        ] {
            driver.set_isolation(&mut tx, level).await.unwrap();
        }
        driver.commit(tx).await.unwrap();

        let sent = driver.statements.lock();
        assert_eq!(
            sent.as_slice(),
            &[
                "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
                "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
                "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_driver_opts_out_of_dialect() {
        let driver = MemoryDriver::new();
        assert_eq!(driver.isolation_statement(IsolationLevel::Serializable), None);
    }
}
