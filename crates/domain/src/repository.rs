//! Typed access to entities over a record store.

use std::marker::PhantomData;
use std::time::Duration;

use store::{RecordStore, StoreError, Version};

use crate::entity::Entity;
use crate::error::{MutationError, RepositoryError};

/// An entity together with the record version it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<E> {
    pub entity: E,
    pub version: Version,
}

/// Result of a successful read-modify-write.
#[derive(Debug)]
pub struct Mutation<E, T> {
    /// The entity as written.
    pub entity: E,

    /// Whatever the mutation closure returned.
    pub output: T,

    /// The record version after the write.
    pub version: Version,
}

/// Repository for one entity type.
///
/// The repository is responsible for:
/// 1. Mapping entities to `(kind, id, payload)` records and back
/// 2. Running read-modify-write cycles as version-conditioned updates
/// 3. Retrying those cycles on conflict, within a caller-supplied budget
pub struct Repository<S, E>
where
    S: RecordStore,
    E: Entity,
{
    store: S,
    _phantom: PhantomData<E>,
}

impl<S, E> Clone for Repository<S, E>
where
    S: RecordStore + Clone,
    E: Entity,
{
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<S, E> Repository<S, E>
where
    S: RecordStore,
    E: Entity,
{
    /// Creates a new repository over the given record store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    /// Returns a reference to the underlying record store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an entity with its version, or None if it doesn't exist.
    pub async fn load(&self, id: &str) -> Result<Option<Versioned<E>>, RepositoryError> {
        let Some(record) = self.store.get(E::KIND, id).await? else {
            return Ok(None);
        };
        let entity: E = serde_json::from_value(record.payload)?;
        Ok(Some(Versioned {
            entity,
            version: record.version,
        }))
    }

    /// Loads an entity, dropping its version.
    pub async fn get(&self, id: &str) -> Result<Option<E>, RepositoryError> {
        Ok(self.load(id).await?.map(|v| v.entity))
    }

    /// Persists a new entity. Fails if one with the same id exists.
    pub async fn insert(&self, entity: &E) -> Result<Version, RepositoryError> {
        let payload = serde_json::to_value(entity)?;
        Ok(self
            .store
            .insert(E::KIND, &entity.entity_id(), payload)
            .await?)
    }

    /// Writes an entity back if nobody else wrote it since `expected`.
    pub async fn save(&self, entity: &E, expected: Version) -> Result<Version, RepositoryError> {
        let payload = serde_json::to_value(entity)?;
        Ok(self
            .store
            .update(E::KIND, &entity.entity_id(), expected, payload)
            .await?)
    }

    /// Deletes an entity. Returns false if it was already gone.
    pub async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.store.delete(E::KIND, id).await?)
    }

    /// Lists every stored entity of this type, oldest write first.
    pub async fn list(&self) -> Result<Vec<E>, RepositoryError> {
        self.store
            .list(E::KIND)
            .await?
            .into_iter()
            .map(|record| serde_json::from_value(record.payload).map_err(RepositoryError::from))
            .collect()
    }

    /// Applies `mutate` to the current entity and writes it back atomically.
    ///
    /// The closure runs against a fresh read on every attempt, so it must be
    /// free of side effects. A conflicting write from another task causes a
    /// re-read and another attempt; after `max_retries` retries the mutation
    /// fails with `Exhausted`.
    pub async fn mutate<T, Err, F>(
        &self,
        id: &str,
        max_retries: u32,
        mut mutate: F,
    ) -> Result<Mutation<E, T>, MutationError<Err>>
    where
        F: FnMut(&mut E) -> Result<T, Err>,
    {
        let attempts = max_retries.saturating_add(1);

        for attempt in 0..attempts {
            let Some(Versioned {
                mut entity,
                version,
            }) = self.load(id).await?
            else {
                return Err(MutationError::NotFound {
                    kind: E::KIND,
                    id: id.to_string(),
                });
            };

            let output = mutate(&mut entity).map_err(MutationError::Rejected)?;

            match self.save(&entity, version).await {
                Ok(version) => {
                    return Ok(Mutation {
                        entity,
                        output,
                        version,
                    });
                }
                Err(e) if e.is_conflict() => {
                    metrics::counter!("repository_mutation_retries_total", "kind" => E::KIND)
                        .increment(1);
                    tracing::debug!(kind = E::KIND, id, attempt, "version conflict, retrying");
                    backoff(attempt).await;
                }
                Err(RepositoryError::Store(StoreError::NotFound { .. })) => {
                    return Err(MutationError::NotFound {
                        kind: E::KIND,
                        id: id.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(kind = E::KIND, id, attempts, "mutation retry budget exhausted");
        Err(MutationError::Exhausted {
            kind: E::KIND,
            id: id.to_string(),
            attempts,
        })
    }
}

/// Yields on the first retries, then sleeps a little longer each time.
async fn backoff(attempt: u32) {
    if attempt < 2 {
        tokio::task::yield_now().await;
    } else {
        let millis = u64::from(attempt.min(8));
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use store::InMemoryRecordStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: String,
        value: u32,
    }

    impl Entity for Counter {
        const KIND: &'static str = "counter";

        fn entity_id(&self) -> String {
            self.id.clone()
        }
    }

    #[derive(Debug, PartialEq, thiserror::Error)]
    #[error("value too large")]
    struct TooLarge;

    fn counter(id: &str, value: u32) -> Counter {
        Counter {
            id: id.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryRecordStore::new());
        repo.insert(&counter("a", 1)).await.unwrap();

        let loaded = repo.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.entity, counter("a", 1));
        assert_eq!(loaded.version, Version::first());
        assert!(repo.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_with_stale_version_conflicts() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryRecordStore::new());
        repo.insert(&counter("a", 1)).await.unwrap();
        repo.save(&counter("a", 2), Version::first()).await.unwrap();

        let err = repo
            .save(&counter("a", 3), Version::first())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_mutate_applies_and_bumps_version() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryRecordStore::new());
        repo.insert(&counter("a", 1)).await.unwrap();

        let result = repo
            .mutate("a", 3, |c| {
                c.value += 10;
                Ok::<_, TooLarge>(c.value)
            })
            .await
            .unwrap();

        assert_eq!(result.output, 11);
        assert_eq!(result.version, Version::new(2));
        assert_eq!(repo.get("a").await.unwrap().unwrap().value, 11);
    }

    #[tokio::test]
    async fn test_mutate_rejection_leaves_entity_untouched() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryRecordStore::new());
        repo.insert(&counter("a", 1)).await.unwrap();

        let result = repo
            .mutate("a", 3, |c| {
                c.value = 999;
                Err::<(), _>(TooLarge)
            })
            .await;

        assert!(matches!(result, Err(MutationError::Rejected(TooLarge))));
        let stored = repo.load("a").await.unwrap().unwrap();
        assert_eq!(stored.entity.value, 1);
        assert_eq!(stored.version, Version::first());
    }

    #[tokio::test]
    async fn test_mutate_missing_entity() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryRecordStore::new());
        let result = repo.mutate("nope", 3, |_| Ok::<_, TooLarge>(())).await;
        assert!(matches!(result, Err(MutationError::NotFound { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_all_land() {
        let store = InMemoryRecordStore::new();
        let repo: Repository<_, Counter> = Repository::new(store.clone());
        repo.insert(&counter("a", 0)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let repo: Repository<_, Counter> = Repository::new(store.clone());
            handles.push(tokio::spawn(async move {
                repo.mutate("a", 100, |c| {
                    c.value += 1;
                    Ok::<_, TooLarge>(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(repo.get("a").await.unwrap().unwrap().value, 20);
    }

    #[tokio::test]
    async fn test_list_returns_all_of_kind() {
        let repo: Repository<_, Counter> = Repository::new(InMemoryRecordStore::new());
        repo.insert(&counter("a", 1)).await.unwrap();
        repo.insert(&counter("b", 2)).await.unwrap();

        let mut all = repo.list().await.unwrap();
        all.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(all, vec![counter("a", 1), counter("b", 2)]);

        assert!(repo.delete("a").await.unwrap());
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
