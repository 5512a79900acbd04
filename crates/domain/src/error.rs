//! Repository error types.

use store::StoreError;
use thiserror::Error;

/// Errors that can occur while reading or writing entities.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// An error occurred in the record store.
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    /// Returns true if the underlying store reported a lost race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::Store(e) if e.is_conflict())
    }
}

/// Outcome of a failed read-modify-write on a single entity.
///
/// `E` is the business error the mutation closure may reject with.
#[derive(Debug, Error)]
pub enum MutationError<E> {
    /// The entity's own rules rejected the change.
    #[error("{0}")]
    Rejected(E),

    /// Entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Every attempt lost the race to another writer.
    #[error("{kind} {id} still contended after {attempts} attempts")]
    Exhausted {
        kind: &'static str,
        id: String,
        attempts: u32,
    },

    /// Storage failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
