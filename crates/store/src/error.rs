use thiserror::Error;

use crate::{AggregateId, Version};

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction committed the record first.
    #[error(
        "Concurrency conflict for {aggregate_type} {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate_type: String,
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// A unique secondary key is already owned by another aggregate.
    #[error("Duplicate {aggregate_type} {key}: {value}")]
    DuplicateKey {
        aggregate_type: String,
        key: String,
        value: String,
    },

    /// The write itself was rejected by the backend.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The transaction could not be committed; nothing was applied.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true for errors caused by a competing writer rather than a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrencyConflict { .. } | StoreError::DuplicateKey { .. }
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
