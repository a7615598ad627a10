use thiserror::Error;

use crate::{CorrelationId, Version};

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The instance was modified since it was loaded.
    /// The expected version did not match the stored version.
    #[error(
        "Concurrency conflict for {workflow} instance {correlation_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        workflow: String,
        correlation_id: CorrelationId,
        expected: Version,
        actual: Version,
    },

    /// Outbox entries staged with a write do not belong to that write.
    #[error("Invalid outbox batch: {0}")]
    InvalidOutbox(String),

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
    /// Returns true if this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
