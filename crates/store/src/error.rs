use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional update lost the race: the stored version moved on.
    #[error("Version conflict for {kind} {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        kind: String,
        id: String,
        expected: Version,
        actual: Version,
    },

    /// An insert targeted a key that already exists.
    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: String, id: String },

    /// The record was not found.
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    /// The record key is empty or otherwise unusable.
    #[error("Invalid record key ({kind:?}, {id:?})")]
    InvalidKey { kind: String, id: String },

    /// The backend refused or could not complete the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

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
    /// Returns true when retrying the read-modify-write cycle may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::AlreadyExists { .. }
        )
    }
}

/// Result type for record store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
