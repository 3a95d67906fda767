//! Local store error types.

use issuecache_core::ErrorKind;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Any storage failure that may succeed on a later attempt (locked
    /// database, I/O hiccup).
    #[error("Storage failure: {0}")]
    Storage(String),

    /// A write broke a schema constraint, e.g. a comment whose owning issue
    /// is not stored. Repeating the same write fails the same way.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// The database file is damaged, not a database, or written by a newer
    /// schema than this build understands.
    #[error("Data corruption detected: {0}")]
    Corrupted(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Storage(_) => ErrorKind::Transient,
            StoreError::Constraint(_) | StoreError::Corrupted(_) => ErrorKind::Corrupted,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            StoreError::Storage(_) => "Failed to save synced data. Please try again.",
            StoreError::Constraint(_) => {
                "Local data is inconsistent. Consider running a full sync."
            }
            StoreError::Corrupted(_) => {
                "Local data may be corrupted. Consider resetting the cache."
            }
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
                ) =>
            {
                StoreError::Corrupted(err.to_string())
            }
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(err.to_string())
            }
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                StoreError::Corrupted(err.to_string())
            }
            _ => StoreError::Storage(err.to_string()),
        }
    }
}

/// A JSON column that no longer decodes means the row was not written by us.
impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupted(format!("undecodable column: {}", err))
    }
}
