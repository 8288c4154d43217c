use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, AggregateRecord, Result, StoreError, UniqueKey, Version,
    store::{StoreTransaction, TransactionalStore},
};

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
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
}

#[async_trait]
impl TransactionalStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

/// A transaction against a [`PostgresStore`].
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

fn row_to_record(row: PgRow) -> Result<AggregateRecord> {
    Ok(AggregateRecord {
        aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
        aggregate_type: row.try_get("aggregate_type")?,
        version: Version::new(row.try_get("version")?),
        updated_at: row.try_get("updated_at")?,
        state: row.try_get("state")?,
    })
}

impl PostgresTransaction {
    async fn current_version(
        &mut self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM aggregates WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(aggregate_type)
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(Version::new(version.unwrap_or(0)))
    }

    async fn claim_key(
        &mut self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
        key: &UniqueKey,
    ) -> Result<()> {
        // Release a previous value of the same key.
        sqlx::query(
            r#"
            DELETE FROM aggregate_keys
            WHERE aggregate_type = $1 AND aggregate_id = $2 AND key_name = $3 AND key_value <> $4
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id.as_uuid())
        .bind(&key.name)
        .bind(&key.value)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO aggregate_keys (aggregate_type, key_name, key_value, aggregate_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_type, key_name, key_value) DO NOTHING
            "#,
        )
        .bind(aggregate_type)
        .bind(&key.name)
        .bind(&key.value)
        .bind(aggregate_id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        let owner: Uuid = sqlx::query_scalar(
            r#"
            SELECT aggregate_id FROM aggregate_keys
            WHERE aggregate_type = $1 AND key_name = $2 AND key_value = $3
            "#,
        )
        .bind(aggregate_type)
        .bind(&key.name)
        .bind(&key.value)
        .fetch_one(&mut *self.tx)
        .await?;

        if owner != aggregate_id.as_uuid() {
            return Err(StoreError::DuplicateKey {
                aggregate_type: aggregate_type.to_string(),
                key: key.name.clone(),
                value: key.value.clone(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn load(
        &mut self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, updated_at, state
            FROM aggregates
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_record).transpose()
    }

    async fn find_by_key(
        &mut self,
        aggregate_type: &str,
        key: &UniqueKey,
    ) -> Result<Option<AggregateRecord>> {
        let row = sqlx::query(
            r#"
            SELECT a.aggregate_id, a.aggregate_type, a.version, a.updated_at, a.state
            FROM aggregate_keys k
            JOIN aggregates a
              ON a.aggregate_type = k.aggregate_type AND a.aggregate_id = k.aggregate_id
            WHERE k.aggregate_type = $1 AND k.key_name = $2 AND k.key_value = $3
            "#,
        )
        .bind(aggregate_type)
        .bind(&key.name)
        .bind(&key.value)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(row_to_record).transpose()
    }

    async fn list(&mut self, aggregate_type: &str) -> Result<Vec<AggregateRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, updated_at, state
            FROM aggregates
            WHERE aggregate_type = $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(aggregate_type)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter().map(row_to_record).collect()
    }

    async fn upsert(
        &mut self,
        record: AggregateRecord,
        expected_version: Version,
        keys: Vec<UniqueKey>,
    ) -> Result<Version> {
        let aggregate_type = record.aggregate_type.as_str();
        let aggregate_id = record.aggregate_id;
        let version = expected_version.next();

        let affected = if expected_version == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO aggregates (aggregate_type, aggregate_id, version, updated_at, state)
                VALUES ($1, $2, $3, NOW(), $4)
                ON CONFLICT (aggregate_type, aggregate_id) DO NOTHING
                "#,
            )
            .bind(aggregate_type)
            .bind(aggregate_id.as_uuid())
            .bind(version.as_i64())
            .bind(&record.state)
            .execute(&mut *self.tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE aggregates
                SET version = $3, updated_at = NOW(), state = $4
                WHERE aggregate_type = $1 AND aggregate_id = $2 AND version = $5
                "#,
            )
            .bind(aggregate_type)
            .bind(aggregate_id.as_uuid())
            .bind(version.as_i64())
            .bind(&record.state)
            .bind(expected_version.as_i64())
            .execute(&mut *self.tx)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            let actual = self.current_version(aggregate_type, aggregate_id).await?;
            return Err(StoreError::ConcurrencyConflict {
                aggregate_type: aggregate_type.to_string(),
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        for key in &keys {
            self.claim_key(aggregate_type, aggregate_id, key).await?;
        }

        Ok(version)
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::CommitFailed(e.to_string()))
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
