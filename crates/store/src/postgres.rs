use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Result, StoreError, StoredRecord, Version,
    store::{RecordStore, validate_key},
};

/// PostgreSQL-backed record store implementation.
///
/// Conditional updates are a single `UPDATE ... WHERE version = $n`, so the
/// version check and the write happen under the row lock Postgres takes for
/// the statement.
#[derive(Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Creates a new PostgreSQL record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a store over a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<StoredRecord> {
        Ok(StoredRecord {
            kind: row.try_get("kind")?,
            id: row.try_get("id")?,
            version: Version::new(row.try_get("version")?),
            payload: row.try_get("payload")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    async fn get(&self, kind: &str, id: &str) -> Result<Option<StoredRecord>> {
        validate_key(kind, id)?;

        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT kind, id, version, payload, updated_at
            FROM records
            WHERE kind = $1 AND id = $2
            "#,
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn insert(&self, kind: &str, id: &str, payload: serde_json::Value) -> Result<Version> {
        validate_key(kind, id)?;

        let result = sqlx::query(
            r#"
            INSERT INTO records (kind, id, version, payload, updated_at)
            VALUES ($1, $2, 1, $3, NOW())
            ON CONFLICT (kind, id) DO NOTHING
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }
        Ok(Version::first())
    }

    async fn update(
        &self,
        kind: &str,
        id: &str,
        expected: Version,
        payload: serde_json::Value,
    ) -> Result<Version> {
        validate_key(kind, id)?;

        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE records
            SET version = version + 1, payload = $4, updated_at = NOW()
            WHERE kind = $1 AND id = $2 AND version = $3
            RETURNING version
            "#,
        )
        .bind(kind)
        .bind(id)
        .bind(expected.as_i64())
        .bind(&payload)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(version) = new_version {
            return Ok(Version::new(version));
        }

        // Nothing matched: tell a lost race apart from a missing row
        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM records WHERE kind = $1 AND id = $2")
                .bind(kind)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match actual {
            Some(actual) => {
                metrics::counter!("store_version_conflicts_total", "kind" => kind.to_string())
                    .increment(1);
                tracing::debug!(kind, id, %expected, actual, "conditional update lost race");
                Err(StoreError::VersionConflict {
                    kind: kind.to_string(),
                    id: id.to_string(),
                    expected,
                    actual: Version::new(actual),
                })
            }
            None => Err(StoreError::NotFound {
                kind: kind.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn delete(&self, kind: &str, id: &str) -> Result<bool> {
        validate_key(kind, id)?;

        let result = sqlx::query("DELETE FROM records WHERE kind = $1 AND id = $2")
            .bind(kind)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, kind: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT kind, id, version, payload, updated_at
            FROM records
            WHERE kind = $1
            ORDER BY updated_at ASC, id ASC
            "#,
        )
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
