//! Error taxonomy and classification.
//!
//! Every failure path funnels through [`classify`], so callers always see
//! one of the eight [`ErrorKind`] values — never a raw driver error.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Error kinds
// ============================================================================

/// Closed set of semantic failure kinds. Classification assigns exactly one
/// kind to every raw error; anything unrecognized falls to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    UniqueConstraintViolation,
    ForeignKeyViolation,
    ConnectionFailure,
    Timeout,
    Deadlock,
    SerializationFailure,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::UniqueConstraintViolation => "UNIQUE_CONSTRAINT_VIOLATION",
            ErrorKind::ForeignKeyViolation => "FOREIGN_KEY_VIOLATION",
            ErrorKind::ConnectionFailure => "CONNECTION_FAILURE",
            ErrorKind::Timeout => "TRANSACTION_TIMEOUT",
            ErrorKind::Deadlock => "DEADLOCK_DETECTED",
            ErrorKind::SerializationFailure => "SERIALIZATION_FAILURE",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Driver errors
// ============================================================================

/// Structured error surface a [`Driver`](crate::driver::Driver) produces.
///
/// SQL backends report constraint and concurrency failures through SQLSTATE
/// codes; drivers without structured codes can fall back to `Other` and let
/// the textual patterns in [`classify`] take over.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// An error carrying a five-character SQLSTATE code, with the offending
    /// column/constraint name when the backend exposes it.
    #[error("sqlstate {code}: {message}")]
    Sqlstate {
        code: String,
        message: String,
        field: Option<String>,
    },

    /// The driver rejected the statement before executing it.
    #[error("validation error: {0}")]
    Validation(String),

    /// Update or delete addressed a row that does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Connection or client-initialization failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Anything the driver could not express structurally.
    #[error("{0}")]
    Other(String),
}

// SQLSTATE codes the classifier understands.
const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";
const SQLSTATE_FOREIGN_KEY_VIOLATION: &str = "23503";
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";
const SQLSTATE_QUERY_CANCELED: &str = "57014";

// ============================================================================
// Work errors
// ============================================================================

/// What a unit of work may fail with.
///
/// `Abort` is the distinguished caller error: a business-rule rejection
/// thrown deliberately inside the transaction body to force rollback. It is
/// always terminal — retrying a deliberate rejection would repeat work that
/// will deliberately fail again.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("aborted: {0}")]
    Abort(String),
}

impl WorkError {
    /// Shorthand for a deliberate business-rule rollback.
    pub fn abort(reason: impl Into<String>) -> Self {
        WorkError::Abort(reason.into())
    }
}

// ============================================================================
// Classification
// ============================================================================

/// A classified error: one kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ErrorKind,
    pub message: String,
}

/// Map a work error to exactly one [`ErrorKind`]. Pure and total: no side
/// effects, never panics, unrecognized input falls to `Unknown`.
///
/// An unrecognized SQLSTATE is deliberately given to the textual patterns
/// before falling to `Unknown`: some backends report deadlocks and lock
/// timeouts under vendor codes with the detail only in the message.
pub fn classify(err: &WorkError) -> Classified {
    match err {
        WorkError::Abort(reason) => Classified {
            kind: ErrorKind::Validation,
            message: format!("aborted by caller: {reason}"),
        },
        WorkError::Driver(e) => classify_driver(e),
    }
}

fn classify_driver(err: &DriverError) -> Classified {
    match err {
        DriverError::Sqlstate { code, message, field } => match code.as_str() {
            SQLSTATE_UNIQUE_VIOLATION => Classified {
                kind: ErrorKind::UniqueConstraintViolation,
                message: format!(
                    "unique constraint violation: {}",
                    field.as_deref().unwrap_or("unknown field")
                ),
            },
            SQLSTATE_FOREIGN_KEY_VIOLATION => Classified {
                kind: ErrorKind::ForeignKeyViolation,
                message: format!(
                    "foreign key constraint violation: {}",
                    field.as_deref().unwrap_or("unknown field")
                ),
            },
            SQLSTATE_SERIALIZATION_FAILURE => Classified {
                kind: ErrorKind::SerializationFailure,
                message: "serialization failure in transaction".into(),
            },
            SQLSTATE_DEADLOCK_DETECTED => Classified {
                kind: ErrorKind::Deadlock,
                message: "deadlock detected in transaction".into(),
            },
            SQLSTATE_QUERY_CANCELED => Classified {
                kind: ErrorKind::Timeout,
                message: "statement canceled by the backend".into(),
            },
            // Class 08 covers all connection exceptions.
            code if code.starts_with("08") => Classified {
                kind: ErrorKind::ConnectionFailure,
                message: format!("connection failure: {message}"),
            },
            _ => classify_text(message),
        },
        DriverError::Validation(msg) => Classified {
            kind: ErrorKind::Validation,
            message: format!("validation error: {msg}"),
        },
        DriverError::NotFound(msg) => Classified {
            kind: ErrorKind::Validation,
            message: format!("record not found: {msg}"),
        },
        DriverError::Connection(msg) => Classified {
            kind: ErrorKind::ConnectionFailure,
            message: format!("connection failure: {msg}"),
        },
        DriverError::Other(msg) => classify_text(msg),
    }
}

/// Textual fallback for drivers that surface concurrency failures only in
/// the message body.
fn classify_text(message: &str) -> Classified {
    let lower = message.to_ascii_lowercase();
    if lower.contains("deadlock") {
        Classified {
            kind: ErrorKind::Deadlock,
            message: "deadlock detected in transaction".into(),
        }
    } else if lower.contains("serialization failure") {
        Classified {
            kind: ErrorKind::SerializationFailure,
            message: "serialization failure in transaction".into(),
        }
    } else if lower.contains("timeout") {
        Classified {
            kind: ErrorKind::Timeout,
            message: "transaction timeout".into(),
        }
    } else {
        Classified {
            kind: ErrorKind::Unknown,
            message: format!("unknown error: {message}"),
        }
    }
}
