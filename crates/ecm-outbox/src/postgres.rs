use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecm_common::{OutboxMessage, OutboxRecord};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::repository::OutboxRepository;

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS outbox (
        id BIGSERIAL PRIMARY KEY,
        aggregate VARCHAR(128) NOT NULL,
        aggregate_id UUID NOT NULL,
        type VARCHAR(256) NOT NULL,
        payload JSONB NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL,
        processed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_outbox_unprocessed \
     ON outbox(id) WHERE processed_at IS NULL",
];

/// PostgreSQL outbox backend.
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // One statement per query: Postgres rejects multi-command strings on
    // the prepared-statement path sqlx::query uses.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert records inside the caller's transaction so business writes
    /// and outbox rows commit atomically.
    pub async fn append_all(
        tx: &mut Transaction<'_, Postgres>,
        records: &[OutboxRecord],
    ) -> Result<()> {
        for record in records {
            sqlx::query(
                "INSERT INTO outbox (aggregate, aggregate_id, type, payload, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&record.aggregate_type)
            .bind(record.aggregate_id)
            .bind(&record.event_type)
            .bind(&record.payload)
            .bind(record.occurred_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxStore {
    async fn fetch_unprocessed(&self, limit: u32) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            "SELECT id, aggregate, aggregate_id, type, payload, occurred_at, processed_at \
             FROM outbox WHERE processed_at IS NULL ORDER BY id ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(OutboxMessage {
                id: row.get("id"),
                aggregate_type: row.get("aggregate"),
                aggregate_id: row.get::<Uuid, _>("aggregate_id"),
                event_type: row.get("type"),
                payload: row.get("payload"),
                occurred_at: row.get::<DateTime<Utc>, _>("occurred_at"),
                processed_at: row.get::<Option<DateTime<Utc>>, _>("processed_at"),
            });
        }
        Ok(messages)
    }

    async fn mark_processed(&self, id: i64) -> Result<()> {
        // The processed_at IS NULL guard keeps the transition one-shot.
        sqlx::query("UPDATE outbox SET processed_at = now() WHERE id = $1 AND processed_at IS NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
