use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ecm_common::{OutboxMessage, OutboxRecord};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::repository::OutboxRepository;

/// SQLite outbox backend. Timestamps are stored as epoch millis, uuids as
/// text.
pub struct SqliteOutboxStore {
    pool: SqlitePool,
}

impl SqliteOutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                aggregate TEXT NOT NULL,
                aggregate_id TEXT NOT NULL,
                type TEXT NOT NULL,
                payload TEXT NOT NULL,
                occurred_at BIGINT NOT NULL,
                processed_at BIGINT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_unprocessed \
             ON outbox(id) WHERE processed_at IS NULL",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert records inside the caller's transaction so business writes
    /// and outbox rows commit atomically.
    pub async fn append_all(
        tx: &mut Transaction<'_, Sqlite>,
        records: &[OutboxRecord],
    ) -> Result<()> {
        for record in records {
            sqlx::query(
                "INSERT INTO outbox (aggregate, aggregate_id, type, payload, occurred_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&record.aggregate_type)
            .bind(record.aggregate_id.to_string())
            .bind(&record.event_type)
            .bind(record.payload.to_string())
            .bind(record.occurred_at.timestamp_millis())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxMessage> {
    let aggregate_id: String = row.get("aggregate_id");
    let payload: String = row.get("payload");
    let occurred_at_ms: i64 = row.get("occurred_at");
    let processed_at_ms: Option<i64> = row.get("processed_at");

    let occurred_at = DateTime::from_timestamp_millis(occurred_at_ms)
        .ok_or_else(|| anyhow::anyhow!("Invalid occurred_at timestamp"))?;
    let processed_at = match processed_at_ms {
        Some(ms) => Some(
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| anyhow::anyhow!("Invalid processed_at timestamp"))?,
        ),
        None => None,
    };

    Ok(OutboxMessage {
        id: row.get("id"),
        aggregate_type: row.get("aggregate"),
        aggregate_id: Uuid::parse_str(&aggregate_id)?,
        event_type: row.get("type"),
        payload: serde_json::from_str(&payload)?,
        occurred_at,
        processed_at,
    })
}

#[async_trait]
impl OutboxRepository for SqliteOutboxStore {
    async fn fetch_unprocessed(&self, limit: u32) -> Result<Vec<OutboxMessage>> {
        let rows = sqlx::query(
            "SELECT id, aggregate, aggregate_id, type, payload, occurred_at, processed_at \
             FROM outbox WHERE processed_at IS NULL ORDER BY id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn mark_processed(&self, id: i64) -> Result<()> {
        // The processed_at IS NULL guard keeps the transition one-shot.
        sqlx::query("UPDATE outbox SET processed_at = ? WHERE id = ? AND processed_at IS NULL")
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
