//! # txguard — Transactional Execution Wrapper
//!
//! A retrying, instrumented wrapper over a database driver's native
//! transactions.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `Driver` is the contract between the executor and any
//!    database client; `EntityStore` is the typed seam for entity mutations
//! 2. **Closed taxonomy**: every failure classifies to exactly one
//!    `ErrorKind` — callers never see a raw driver error
//! 3. **Transient vs terminal**: deadlocks, serialization failures, timeouts
//!    and dropped connections retry with capped exponential backoff; all
//!    other kinds surface immediately
//! 4. **The driver owns the handle**: no transaction outlives the driver's
//!    callback scope, no partial commits, no connection management here
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use txguard::{TransactionManager, MemoryDriver, JsonStore, OpOptions};
//! use serde_json::json;
//!
//! # async fn example() -> txguard::Result<()> {
//! let driver = MemoryDriver::new();
//! driver.create_table("campaign", &["slug"]);
//!
//! let manager = TransactionManager::new(driver);
//! let campaigns = JsonStore::new("campaign");
//!
//! let row = manager
//!     .create(
//!         &campaigns,
//!         json!({"slug": "launch", "name": "Launch"}),
//!         OpOptions::default().actor("user-1"),
//!     )
//!     .await?;
//!
//! println!("created campaign {}", row["id"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Drivers
//!
//! | Driver | Module | Description |
//! |--------|--------|-------------|
//! | Memory | `driver::memory` | In-memory JSON tables for testing/embedding |

// ============================================================================
// Modules
// ============================================================================

pub mod classify;
pub mod driver;
pub mod manager;
pub mod options;
pub mod retry;
pub mod store;

// ============================================================================
// Re-exports: Options and results
// ============================================================================

pub use options::{
    IsolationLevel, Operation, RecordId, TransactionMetadata, TransactionOptions,
    TransactionResult,
};

// ============================================================================
// Re-exports: Classification
// ============================================================================

pub use classify::{classify, Classified, DriverError, ErrorKind, WorkError};

// ============================================================================
// Re-exports: Retry policy
// ============================================================================

pub use retry::{Jitter, NoJitter, RetryPolicy, ThreadRngJitter};

// ============================================================================
// Re-exports: Driver and stores
// ============================================================================

pub use driver::{Driver, MemoryDriver, MemoryTx};
pub use store::{EntityStore, JsonStore};

// ============================================================================
// Re-exports: Manager
// ============================================================================

pub use manager::{OpOptions, TransactionManager, TxWork};

// ============================================================================
// Error type
// ============================================================================

/// Terminal transaction failure: the classified kind plus enough context
/// (id, attempt count, metadata, cause) for a meaningful log entry or
/// user-facing message higher up the stack.
#[derive(Debug, thiserror::Error)]
#[error("transaction {transaction_id} failed after {attempt_count} attempt(s) [{kind}]: {message}")]
pub struct TransactionError {
    pub kind: ErrorKind,
    pub message: String,
    pub transaction_id: String,
    pub metadata: Option<TransactionMetadata>,
    /// How many attempts ran before giving up (1-based).
    pub attempt_count: u32,
    #[source]
    pub cause: Option<WorkError>,
    /// Diagnostic payload for drivers that can attach the failing statement.
    pub raw_query: Option<String>,
    pub raw_params: Option<serde_json::Value>,
}

impl TransactionError {
    /// Attach the failing statement and its parameters for diagnostics.
    pub fn with_query(mut self, query: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        self.raw_query = Some(query.into());
        self.raw_params = params;
        self
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;
