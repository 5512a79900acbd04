use async_trait::async_trait;

use crate::{Result, StoreError, StoredRecord, Version};

/// Core trait for record store implementations.
///
/// Every write is atomic per record. `update` is a compare-and-swap on the
/// record version, which is what makes stock and coupon mutations
/// linearizable without holding locks across awaits.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Reads a record. Returns None if it does not exist.
    async fn get(&self, kind: &str, id: &str) -> Result<Option<StoredRecord>>;

    /// Inserts a new record at version 1.
    ///
    /// Fails with `AlreadyExists` if the key is taken.
    async fn insert(&self, kind: &str, id: &str, payload: serde_json::Value) -> Result<Version>;

    /// Replaces a record if its current version equals `expected`.
    ///
    /// Fails with `VersionConflict` if another writer got there first, or
    /// `NotFound` if the record is gone. Returns the new version.
    async fn update(
        &self,
        kind: &str,
        id: &str,
        expected: Version,
        payload: serde_json::Value,
    ) -> Result<Version>;

    /// Deletes a record. Returns false if there was nothing to delete.
    async fn delete(&self, kind: &str, id: &str) -> Result<bool>;

    /// Lists every record of a kind, oldest write first.
    async fn list(&self, kind: &str) -> Result<Vec<StoredRecord>>;
}

/// Extension trait providing convenience methods for record stores.
#[async_trait]
pub trait RecordStoreExt: RecordStore {
    /// Checks if a record exists.
    async fn exists(&self, kind: &str, id: &str) -> Result<bool> {
        Ok(self.get(kind, id).await?.is_some())
    }

    /// Inserts or overwrites a record regardless of its version.
    ///
    /// Only meant for loading reference data; business writes go through
    /// `update` with the version they read.
    async fn put(&self, kind: &str, id: &str, payload: serde_json::Value) -> Result<Version> {
        loop {
            let result = match self.get(kind, id).await? {
                Some(current) => self.update(kind, id, current.version, payload.clone()).await,
                None => self.insert(kind, id, payload.clone()).await,
            };
            match result {
                Err(e) if e.is_conflict() => continue,
                other => return other,
            }
        }
    }
}

// Blanket implementation for all RecordStore implementations
impl<T: RecordStore + ?Sized> RecordStoreExt for T {}

/// Validates a record key before it reaches the backend.
pub fn validate_key(kind: &str, id: &str) -> Result<()> {
    if kind.is_empty() || id.is_empty() {
        return Err(StoreError::InvalidKey {
            kind: kind.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}
