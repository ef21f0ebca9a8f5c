//! Transaction configuration, metadata, and result types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

// ============================================================================
// Isolation levels
// ============================================================================

/// Transaction isolation level, per the SQL standard.
///
/// `Display` yields the SQL spelling (`READ COMMITTED` etc.) so drivers can
/// splice it into their isolation directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling of this level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

// ============================================================================
// Operations
// ============================================================================

/// What kind of mutation a transaction performs — carried in metadata for
/// logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Batch,
    Custom,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Batch => "BATCH",
            Operation::Custom => "CUSTOM",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Record identifiers
// ============================================================================

/// Primary-key value for a single record. Entities key on either strings
/// (UUIDs, slugs) or integers, so both are first-class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Str(String),
    Num(i64),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Str(s) => f.write_str(s),
            RecordId::Num(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Str(s.to_owned())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId::Str(s)
    }
}

impl From<i64> for RecordId {
    fn from(n: i64) -> Self {
        RecordId::Num(n)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Descriptive record attached to every log line and to the final
/// result/error for traceability.
///
/// Built by the caller; the executor only copies it, never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub operation: Operation,
    pub entity_name: String,
    /// Primary keys touched by the operation, in order.
    pub record_ids: SmallVec<[RecordId; 2]>,
    pub actor_id: Option<String>,
    pub description: Option<String>,
    /// Open key-value bag for anything the caller wants correlated.
    pub extra: HashMap<String, Value>,
}

impl TransactionMetadata {
    pub fn new(operation: Operation, entity_name: impl Into<String>) -> Self {
        Self {
            operation,
            entity_name: entity_name.into(),
            record_ids: SmallVec::new(),
            actor_id: None,
            description: None,
            extra: HashMap::new(),
        }
    }

    pub fn record_id(mut self, id: impl Into<RecordId>) -> Self {
        self.record_ids.push(id.into());
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl Default for TransactionMetadata {
    fn default() -> Self {
        Self::new(Operation::Custom, "unknown")
    }
}

// ============================================================================
// Options
// ============================================================================

/// Per-call transaction configuration.
///
/// `Default` carries the process-wide defaults: Read Committed, 3 retries,
/// 100ms backoff base, 30s timeout, logging on. Builders start from a
/// complete value, so every call sees fully resolved options.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOptions {
    pub isolation: IsolationLevel,
    /// Retry budget for transient failures. Zero means a single attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_delay_base: Duration,
    /// Per-attempt deadline, not a budget for the whole retry sequence.
    pub timeout: Duration,
    pub logging_enabled: bool,
    pub metadata: TransactionMetadata,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            max_retries: 3,
            retry_delay_base: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            logging_enabled: true,
            metadata: TransactionMetadata::default(),
        }
    }
}

impl TransactionOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_delay_base(mut self, base: Duration) -> Self {
        self.retry_delay_base = base;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    pub fn metadata(mut self, metadata: TransactionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ============================================================================
// Result
// ============================================================================

/// Outcome of a successful transaction: the caller's value plus timing and
/// the metadata it ran under. Constructed once, on success only.
#[derive(Debug, Clone)]
pub struct TransactionResult<T> {
    pub value: T,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration: Duration,
    pub metadata: TransactionMetadata,
}

impl<T> TransactionResult<T> {
    /// Wall-clock duration in milliseconds.
    pub fn duration_ms(&self) -> u128 {
        self.duration.as_millis()
    }
}
