//! Error types for the playbook engine.
//!
//! The engine uses a hierarchical error system:
//! - `PlaybookError` is the top-level error returned by all public APIs
//! - Specific error types (`StorageError`, `ValidationError`) provide detail
//!
//! # Propagation
//!
//! - Validation problems are absorbed per item by the curator and counted
//!   in its [`MergeReport`](crate::MergeReport).
//! - Embedding failures abort the merge call they occur in.
//! - Completion failures are swallowed by the reflector, which falls back
//!   to the heuristic path.
//! - Storage failures always propagate.
//!
//! ```rust,ignore
//! use ace_playbook::{Playbook, Config, Result};
//!
//! fn example() -> Result<()> {
//!     let playbook = Playbook::open("./playbook.db", Config::default())?;
//!     // ... operations that may fail ...
//!     playbook.close()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias for playbook operations.
pub type Result<T> = std::result::Result<T, PlaybookError>;

/// Top-level error enum for all playbook operations.
///
/// This is the only error type returned by public APIs.
#[derive(Debug, Error)]
pub enum PlaybookError {
    /// Storage layer error (I/O, corruption, transactions).
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Input validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of what's wrong with the configuration.
        reason: String,
    },

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedding provider unreachable or rejected the input.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Completion provider failure.
    #[error("Completion error: {0}")]
    Completion(String),
}

impl PlaybookError {
    /// Creates a configuration error with the given reason.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates an embedding error with the given message.
    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::Embedding(msg.into())
    }

    /// Creates a completion error with the given message.
    pub fn completion(msg: impl Into<String>) -> Self {
        Self::Completion(msg.into())
    }

    /// Returns true if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a storage error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is an embedding error.
    pub fn is_embedding(&self) -> bool {
        matches!(self, Self::Embedding(_))
    }

    /// Returns true if this is a completion error.
    pub fn is_completion(&self) -> bool {
        matches!(self, Self::Completion(_))
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database file or data is corrupted.
    #[error("Database corrupted: {0}")]
    Corrupted(String),

    /// Database is locked by another process.
    #[error("Database is locked by another writer")]
    DatabaseLocked,

    /// Transaction failed (commit, rollback, etc.).
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from the redb storage engine.
    #[error("Storage engine error: {0}")]
    Redb(String),

    /// Database was written by a newer, incompatible schema.
    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Highest schema version this build understands.
        expected: u32,
        /// Schema version found in the database.
        found: u32,
    },
}

impl StorageError {
    /// Creates a corruption error with the given message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::Corrupted(msg.into())
    }

    /// Creates a transaction error with the given message.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Creates a redb error with the given message.
    pub fn redb(msg: impl Into<String>) -> Self {
        Self::Redb(msg.into())
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Redb(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(format!("Commit failed: {}", err))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Redb(format!("Table error: {}", err))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Redb(format!("Storage error: {}", err))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// Direct conversions so `?` works on redb calls inside storage code.
impl From<redb::Error> for PlaybookError {
    fn from(err: redb::Error) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

impl From<redb::DatabaseError> for PlaybookError {
    fn from(err: redb::DatabaseError) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

impl From<redb::TransactionError> for PlaybookError {
    fn from(err: redb::TransactionError) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

impl From<redb::CommitError> for PlaybookError {
    fn from(err: redb::CommitError) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

impl From<redb::TableError> for PlaybookError {
    fn from(err: redb::TableError) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

impl From<redb::StorageError> for PlaybookError {
    fn from(err: redb::StorageError) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

impl From<bincode::Error> for PlaybookError {
    fn from(err: bincode::Error) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

impl From<serde_json::Error> for PlaybookError {
    fn from(err: serde_json::Error) -> Self {
        PlaybookError::Storage(StorageError::from(err))
    }
}

/// Validation errors for bullets, patches and configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field has an invalid value.
    #[error("Invalid field '{field}': {reason}")]
    InvalidField {
        /// Name of the invalid field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// Content exceeds maximum allowed length.
    #[error("Content too large in '{field}': {size} chars (max: {max} chars)")]
    ContentTooLarge {
        /// Name of the field.
        field: String,
        /// Actual length in characters.
        size: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },

    /// A required field is missing or empty.
    #[error("Required field missing: {field}")]
    RequiredField {
        /// Name of the missing field.
        field: String,
    },

    /// Text matched a forbidden pattern.
    #[error("Forbidden content in '{field}'")]
    ForbiddenContent {
        /// Name of the field.
        field: String,
    },
}

impl ValidationError {
    /// Creates an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a content too large error.
    pub fn content_too_large(field: impl Into<String>, size: usize, max: usize) -> Self {
        Self::ContentTooLarge {
            field: field.into(),
            size,
            max,
        }
    }

    /// Creates a required field error.
    pub fn required_field(field: impl Into<String>) -> Self {
        Self::RequiredField {
            field: field.into(),
        }
    }

    /// Creates a forbidden content error.
    pub fn forbidden_content(field: impl Into<String>) -> Self {
        Self::ForbiddenContent {
            field: field.into(),
        }
    }
}
