use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::delivery::{DeliveryStatus, WebhookDelivery};
use crate::repository::WebhookDeliveryRepository;

/// SQLite delivery ledger. Timestamps are stored as epoch millis, uuids as
/// text.
pub struct SqliteDeliveryStore {
    pool: SqlitePool,
}

impl SqliteDeliveryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                endpoint_key TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                created_at BIGINT NOT NULL,
                last_attempt_at BIGINT,
                delivered_at BIGINT,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_deliveries_request_endpoint \
             ON webhook_deliveries(request_id, endpoint_key)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_delivery(row: &sqlx::sqlite::SqliteRow) -> Result<WebhookDelivery> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let created_at_ms: i64 = row.get("created_at");
    let last_attempt_at_ms: Option<i64> = row.get("last_attempt_at");
    let delivered_at_ms: Option<i64> = row.get("delivered_at");

    let to_utc = |ms: i64| {
        DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))
    };

    Ok(WebhookDelivery {
        id: Uuid::parse_str(&id)?,
        request_id: row.get("request_id"),
        endpoint_key: row.get("endpoint_key"),
        payload_json: row.get("payload_json"),
        correlation_id: row.get("correlation_id"),
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("Unknown delivery status '{}'", status))?,
        attempt_count: row.get::<i64, _>("attempt_count") as u32,
        created_at: to_utc(created_at_ms)?,
        last_attempt_at: last_attempt_at_ms.map(to_utc).transpose()?,
        delivered_at: delivered_at_ms.map(to_utc).transpose()?,
        last_error: row.get("last_error"),
    })
}

#[async_trait]
impl WebhookDeliveryRepository for SqliteDeliveryStore {
    async fn find(&self, request_id: &str, endpoint_key: &str) -> Result<Option<WebhookDelivery>> {
        let row = sqlx::query(
            "SELECT id, request_id, endpoint_key, payload_json, correlation_id, status, \
             attempt_count, created_at, last_attempt_at, delivered_at, last_error \
             FROM webhook_deliveries WHERE request_id = ? AND endpoint_key = ?",
        )
        .bind(request_id)
        .bind(endpoint_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_delivery).transpose()
    }

    async fn insert(&self, delivery: &WebhookDelivery) -> Result<bool> {
        // The unique index turns a concurrent duplicate into a no-op insert.
        let result = sqlx::query(
            "INSERT INTO webhook_deliveries \
             (id, request_id, endpoint_key, payload_json, correlation_id, status, \
              attempt_count, created_at, last_attempt_at, delivered_at, last_error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(request_id, endpoint_key) DO NOTHING",
        )
        .bind(delivery.id.to_string())
        .bind(&delivery.request_id)
        .bind(&delivery.endpoint_key)
        .bind(&delivery.payload_json)
        .bind(&delivery.correlation_id)
        .bind(delivery.status.as_str())
        .bind(delivery.attempt_count as i64)
        .bind(delivery.created_at.timestamp_millis())
        .bind(delivery.last_attempt_at.map(|at| at.timestamp_millis()))
        .bind(delivery.delivered_at.map(|at| at.timestamp_millis()))
        .bind(&delivery.last_error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, delivery: &WebhookDelivery) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_deliveries SET status = ?, attempt_count = ?, \
             last_attempt_at = ?, delivered_at = ?, last_error = ? WHERE id = ?",
        )
        .bind(delivery.status.as_str())
        .bind(delivery.attempt_count as i64)
        .bind(delivery.last_attempt_at.map(|at| at.timestamp_millis()))
        .bind(delivery.delivered_at.map(|at| at.timestamp_millis()))
        .bind(&delivery.last_error)
        .bind(delivery.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
