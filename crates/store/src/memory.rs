use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    Result, StoreError, StoredRecord, Version,
    store::{RecordStore, validate_key},
};

/// Test knobs for simulating a misbehaving backend.
#[derive(Debug, Default)]
struct Faults {
    failing_kinds: HashSet<String>,
    write_delays: HashMap<String, Duration>,
}

/// In-memory record store implementation.
///
/// Provides the same conditional-update semantics as the PostgreSQL
/// implementation; every write runs under a single write lock so the
/// version check and the write are one atomic step.
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    records: Arc<RwLock<HashMap<(String, String), StoredRecord>>>,
    faults: Arc<RwLock<Faults>>,
}

impl InMemoryRecordStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records of a kind.
    pub async fn count(&self, kind: &str) -> usize {
        self.records
            .read()
            .await
            .keys()
            .filter(|(k, _)| k == kind)
            .count()
    }

    /// Makes every write (insert/update/delete) of `kind` fail with `Unavailable`.
    pub async fn fail_writes_for(&self, kind: &str) {
        self.faults
            .write()
            .await
            .failing_kinds
            .insert(kind.to_string());
    }

    /// Undoes `fail_writes_for`.
    pub async fn restore_writes_for(&self, kind: &str) {
        self.faults.write().await.failing_kinds.remove(kind);
    }

    /// Delays every write of `kind` by `delay` before it touches the data.
    /// `None` removes the delay.
    pub async fn set_write_delay(&self, kind: &str, delay: Option<Duration>) {
        let mut faults = self.faults.write().await;
        match delay {
            Some(delay) => {
                faults.write_delays.insert(kind.to_string(), delay);
            }
            None => {
                faults.write_delays.remove(kind);
            }
        }
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.records.write().await.clear();
    }

    async fn before_write(&self, kind: &str) -> Result<()> {
        let (failing, delay) = {
            let faults = self.faults.read().await;
            (
                faults.failing_kinds.contains(kind),
                faults.write_delays.get(kind).copied(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(StoreError::Unavailable(format!(
                "writes to {kind} are disabled"
            )));
        }
        Ok(())
    }
}

fn key(kind: &str, id: &str) -> (String, String) {
    (kind.to_string(), id.to_string())
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, kind: &str, id: &str) -> Result<Option<StoredRecord>> {
        validate_key(kind, id)?;
        Ok(self.records.read().await.get(&key(kind, id)).cloned())
    }

    async fn insert(&self, kind: &str, id: &str, payload: serde_json::Value) -> Result<Version> {
        validate_key(kind, id)?;
        self.before_write(kind).await?;

        let mut records = self.records.write().await;
        let k = key(kind, id);
        if records.contains_key(&k) {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }

        let version = Version::first();
        records.insert(
            k,
            StoredRecord {
                kind: kind.to_string(),
                id: id.to_string(),
                version,
                payload,
                updated_at: Utc::now(),
            },
        );
        Ok(version)
    }

    async fn update(
        &self,
        kind: &str,
        id: &str,
        expected: Version,
        payload: serde_json::Value,
    ) -> Result<Version> {
        validate_key(kind, id)?;
        self.before_write(kind).await?;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(&key(kind, id))
            .ok_or_else(|| StoreError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            })?;

        if record.version != expected {
            metrics::counter!("store_version_conflicts_total", "kind" => kind.to_string())
                .increment(1);
            return Err(StoreError::VersionConflict {
                kind: kind.to_string(),
                id: id.to_string(),
                expected,
                actual: record.version,
            });
        }

        record.version = expected.next();
        record.payload = payload;
        record.updated_at = Utc::now();
        Ok(record.version)
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<bool> {
        validate_key(kind, id)?;
        self.before_write(kind).await?;
        Ok(self.records.write().await.remove(&key(kind, id)).is_some())
    }

    async fn list(&self, kind: &str) -> Result<Vec<StoredRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}
