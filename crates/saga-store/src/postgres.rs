use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    CorrelationId, FieldMatch, OutboxEntry, OutboxId, Result, SagaRecord, StoreError, Version,
    store::{SagaStore, validate_outbox},
};

/// PostgreSQL-backed saga store implementation.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<SagaRecord> {
        Ok(SagaRecord {
            workflow: row.try_get("workflow")?,
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            state: row.try_get("state")?,
            version: Version::new(row.try_get("version")?),
            data: row.try_get("data")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_entry(row: PgRow) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            workflow: row.try_get("workflow")?,
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            sequence: row.try_get("sequence")?,
            effect: row.try_get("effect")?,
            created_at: row.try_get("created_at")?,
            dispatched_at: row.try_get("dispatched_at")?,
        })
    }

    /// Reads the stored version under a row lock, `Version::initial()` if absent.
    async fn locked_version(
        tx: &mut Transaction<'_, Postgres>,
        workflow: &str,
        correlation_id: CorrelationId,
    ) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM saga_instances WHERE workflow = $1 AND correlation_id = $2 FOR UPDATE",
        )
        .bind(workflow)
        .bind(correlation_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;

        Ok(version.map(Version::new).unwrap_or(Version::initial()))
    }

    async fn stage_outbox(tx: &mut Transaction<'_, Postgres>, outbox: &[OutboxEntry]) -> Result<()> {
        for entry in outbox {
            sqlx::query(
                r#"
                INSERT INTO saga_outbox (id, workflow, correlation_id, sequence, effect, created_at, dispatched_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(&entry.workflow)
            .bind(entry.correlation_id.as_uuid())
            .bind(entry.sequence)
            .bind(&entry.effect)
            .bind(entry.created_at)
            .bind(entry.dispatched_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    fn conflict(
        workflow: &str,
        correlation_id: CorrelationId,
        expected: Version,
        actual: Version,
    ) -> StoreError {
        StoreError::ConcurrencyConflict {
            workflow: workflow.to_string(),
            correlation_id,
            expected,
            actual,
        }
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn get(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
    ) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT workflow, correlation_id, state, version, data, updated_at
            FROM saga_instances
            WHERE workflow = $1 AND correlation_id = $2
            "#,
        )
        .bind(workflow)
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find(&self, workflow: &str, matches: &[FieldMatch]) -> Result<Vec<SagaRecord>> {
        let mut sql = String::from(
            "SELECT workflow, correlation_id, state, version, data, updated_at FROM saga_instances WHERE workflow = $1",
        );
        let mut param_count = 1;

        for _ in matches {
            sql.push_str(&format!(
                " AND data ->> ${} = ${}",
                param_count + 1,
                param_count + 2
            ));
            param_count += 2;
        }
        sql.push_str(" ORDER BY correlation_id");

        let mut query = sqlx::query(&sql).bind(workflow);
        for m in matches {
            query = query.bind(&m.field).bind(&m.value);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn save(
        &self,
        record: SagaRecord,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<Version> {
        validate_outbox(&record.workflow, record.correlation_id, &outbox)?;

        let mut tx = self.pool.begin().await?;

        let current = Self::locked_version(&mut tx, &record.workflow, record.correlation_id).await?;
        if current != expected {
            return Err(Self::conflict(
                &record.workflow,
                record.correlation_id,
                expected,
                current,
            ));
        }

        let new_version = expected.next();
        let affected = if expected == Version::initial() {
            // A concurrent creator may insert between the locking read and here
            sqlx::query(
                r#"
                INSERT INTO saga_instances (workflow, correlation_id, state, version, data, updated_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (workflow, correlation_id) DO NOTHING
                "#,
            )
            .bind(&record.workflow)
            .bind(record.correlation_id.as_uuid())
            .bind(&record.state)
            .bind(new_version.as_i64())
            .bind(&record.data)
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE saga_instances
                SET state = $3, version = $4, data = $5, updated_at = NOW()
                WHERE workflow = $1 AND correlation_id = $2 AND version = $6
                "#,
            )
            .bind(&record.workflow)
            .bind(record.correlation_id.as_uuid())
            .bind(&record.state)
            .bind(new_version.as_i64())
            .bind(&record.data)
            .bind(expected.as_i64())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            return Err(Self::conflict(
                &record.workflow,
                record.correlation_id,
                expected,
                Version::first(),
            ));
        }

        Self::stage_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;

        tracing::debug!(
            workflow = %record.workflow,
            correlation_id = %record.correlation_id,
            version = %new_version,
            staged = outbox.len(),
            "saga instance saved"
        );
        Ok(new_version)
    }

    async fn delete(
        &self,
        workflow: &str,
        correlation_id: CorrelationId,
        expected: Version,
        outbox: Vec<OutboxEntry>,
    ) -> Result<()> {
        validate_outbox(workflow, correlation_id, &outbox)?;

        let mut tx = self.pool.begin().await?;

        let current = Self::locked_version(&mut tx, workflow, correlation_id).await?;
        if current != expected {
            return Err(Self::conflict(workflow, correlation_id, expected, current));
        }

        if expected != Version::initial() {
            sqlx::query(
                "DELETE FROM saga_instances WHERE workflow = $1 AND correlation_id = $2 AND version = $3",
            )
            .bind(workflow)
            .bind(correlation_id.as_uuid())
            .bind(expected.as_i64())
            .execute(&mut *tx)
            .await?;
        }

        Self::stage_outbox(&mut tx, &outbox).await?;
        tx.commit().await?;

        tracing::debug!(%workflow, %correlation_id, staged = outbox.len(), "saga instance deleted");
        Ok(())
    }

    async fn pending_outbox(&self) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow, correlation_id, sequence, effect, created_at, dispatched_at
            FROM saga_outbox
            WHERE dispatched_at IS NULL
            ORDER BY created_at ASC, sequence ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn mark_dispatched(&self, id: OutboxId) -> Result<()> {
        sqlx::query(
            "UPDATE saga_outbox SET dispatched_at = NOW() WHERE id = $1 AND dispatched_at IS NULL",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_dispatched(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM saga_outbox WHERE dispatched_at IS NOT NULL AND dispatched_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "purged dispatched outbox entries");
        }
        Ok(purged)
    }
}
