use crate::database::error::DatabaseError;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Persisted webhook event (the idempotency ledger)
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEventRecord {
    pub id: Uuid,
    pub event_id: String,
    pub provider: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub payment_id: Option<Uuid>,
    pub status: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const EVENT_COLUMNS: &str = "id, event_id, provider, event_type, payload, signature, \
     payment_id, status, retry_count, last_error, processed_at, created_at";

/// Maximum delivery attempts before an event is parked as `failed`
pub const MAX_EVENT_RETRIES: i32 = 5;

/// Repository for the webhook event ledger
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an incoming event, or return the existing row on redelivery.
    ///
    /// The (provider, event_id) unique constraint is the dedupe point: the
    /// no-op DO UPDATE lets the same statement return the already-logged row
    /// so the caller can check its status.
    pub async fn log_event(
        &self,
        event_id: &str,
        provider: &str,
        event_type: &str,
        payload: serde_json::Value,
        signature: Option<&str>,
        payment_id: Option<Uuid>,
    ) -> Result<WebhookEventRecord, DatabaseError> {
        sqlx::query_as::<_, WebhookEventRecord>(&format!(
            "INSERT INTO webhook_events \
             (event_id, provider, event_type, payload, signature, payment_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'pending') \
             ON CONFLICT (provider, event_id) \
             DO UPDATE SET event_id = EXCLUDED.event_id \
             RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(event_id)
        .bind(provider)
        .bind(event_type)
        .bind(payload)
        .bind(signature)
        .bind(payment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_processed(&self, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE webhook_events \
             SET status = 'completed', processed_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    /// Record a processing failure; the event stays `pending` until the retry
    /// budget is exhausted, then parks as `failed`.
    pub async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE webhook_events \
             SET retry_count = retry_count + 1, \
                 last_error = $2, \
                 status = CASE WHEN retry_count + 1 >= $3 THEN 'failed' ELSE 'pending' END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(MAX_EVENT_RETRIES)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    /// Pending events eligible for retry, oldest first
    pub async fn get_pending_events(
        &self,
        limit: i64,
    ) -> Result<Vec<WebhookEventRecord>, DatabaseError> {
        sqlx::query_as::<_, WebhookEventRecord>(&format!(
            "SELECT {} FROM webhook_events \
             WHERE status = 'pending' AND retry_count < $2 \
             ORDER BY created_at ASC \
             LIMIT $1",
            EVENT_COLUMNS
        ))
        .bind(limit)
        .bind(MAX_EVENT_RETRIES)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
