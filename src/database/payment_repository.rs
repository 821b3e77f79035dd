use crate::database::error::DatabaseError;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Payment entity
#[derive(Debug, Clone, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    pub provider: Option<String>,
    pub provider_ref: Option<String>,
    pub client_secret: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub authorized_at: Option<chrono::DateTime<chrono::Utc>>,
    pub captured_at: Option<chrono::DateTime<chrono::Utc>>,
    pub failed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub refunded_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Payment refund entity
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRefund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub reason: Option<String>,
    /// Caller who asked for the refund; absent for webhook-reported refunds
    pub requested_by: Option<Uuid>,
    pub status: String,
    pub provider_refund_ref: Option<String>,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const PAYMENT_COLUMNS: &str = "id, transaction_id, user_id, amount, currency, payment_method, \
     status, provider, provider_ref, client_secret, failure_reason, metadata, \
     authorized_at, captured_at, failed_at, refunded_at, created_at, updated_at";

const REFUND_COLUMNS: &str = "id, payment_id, amount, currency, reason, requested_by, status, \
     provider_refund_ref, processed_at, created_at, updated_at";

/// Repository for payments and their refunds
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a new payment in `pending` status
    pub async fn create_payment(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        amount: BigDecimal,
        currency: &str,
        payment_method: &str,
        metadata: serde_json::Value,
    ) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "INSERT INTO payments \
             (transaction_id, user_id, amount, currency, payment_method, status, metadata) \
             VALUES ($1, $2, $3, $4, $5, 'pending', $6) \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(transaction_id)
        .bind(user_id)
        .bind(amount)
        .bind(currency)
        .bind(payment_method)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Look up a payment by the reference the provider reported
    pub async fn find_by_provider_ref(
        &self,
        provider: &str,
        provider_ref: &str,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE provider = $1 AND provider_ref = $2",
            PAYMENT_COLUMNS
        ))
        .bind(provider)
        .bind(provider_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Find a payment for the transaction that isn't failed or cancelled
    pub async fn find_active_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Payment>, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments \
             WHERE transaction_id = $1 AND status NOT IN ('failed', 'cancelled') \
             ORDER BY created_at DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record the provider assignment after intent creation
    pub async fn set_provider_details(
        &self,
        id: Uuid,
        provider: &str,
        provider_ref: &str,
        client_secret: Option<&str>,
        status: &str,
    ) -> Result<Payment, DatabaseError> {
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments \
             SET provider = $2, provider_ref = $3, client_secret = $4, status = $5, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(provider)
        .bind(provider_ref)
        .bind(client_secret)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Conditionally transition a payment's status.
    ///
    /// The WHERE clause re-checks the expected source statuses so two racing
    /// writers cannot both win; zero rows affected returns `None` and the
    /// caller decides whether that is a conflict or an idempotent no-op.
    pub async fn transition_status(
        &self,
        id: Uuid,
        from_statuses: &[&str],
        to_status: &str,
        failure_reason: Option<&str>,
    ) -> Result<Option<Payment>, DatabaseError> {
        let from: Vec<String> = from_statuses.iter().map(|s| s.to_string()).collect();
        sqlx::query_as::<_, Payment>(&format!(
            "UPDATE payments \
             SET status = $2, \
                 failure_reason = COALESCE($3, failure_reason), \
                 captured_at = CASE WHEN $2 = 'succeeded' THEN NOW() ELSE captured_at END, \
                 failed_at = CASE WHEN $2 IN ('failed', 'cancelled') THEN NOW() ELSE failed_at END, \
                 refunded_at = CASE WHEN $2 IN ('refunded', 'partially_refunded') \
                     THEN NOW() ELSE refunded_at END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = ANY($4) \
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(to_status)
        .bind(failure_reason)
        .bind(from)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    // -----------------------------------------------------------------------
    // Refunds
    // -----------------------------------------------------------------------

    pub async fn insert_refund(
        &self,
        payment_id: Uuid,
        amount: BigDecimal,
        currency: &str,
        reason: Option<&str>,
        requested_by: Option<Uuid>,
        status: &str,
        provider_refund_ref: Option<&str>,
    ) -> Result<PaymentRefund, DatabaseError> {
        sqlx::query_as::<_, PaymentRefund>(&format!(
            "INSERT INTO payment_refunds \
             (payment_id, amount, currency, reason, requested_by, status, provider_refund_ref, \
              processed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, \
                     CASE WHEN $6 = 'succeeded' THEN NOW() ELSE NULL END) \
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(payment_id)
        .bind(amount)
        .bind(currency)
        .bind(reason)
        .bind(requested_by)
        .bind(status)
        .bind(provider_refund_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_refund_by_provider_ref(
        &self,
        provider_refund_ref: &str,
    ) -> Result<Option<PaymentRefund>, DatabaseError> {
        sqlx::query_as::<_, PaymentRefund>(&format!(
            "SELECT {} FROM payment_refunds WHERE provider_refund_ref = $1",
            REFUND_COLUMNS
        ))
        .bind(provider_refund_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn update_refund_status(
        &self,
        id: Uuid,
        status: &str,
    ) -> Result<PaymentRefund, DatabaseError> {
        sqlx::query_as::<_, PaymentRefund>(&format!(
            "UPDATE payment_refunds \
             SET status = $2, \
                 processed_at = CASE WHEN $2 = 'succeeded' THEN NOW() ELSE processed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            REFUND_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list_refunds(
        &self,
        payment_id: Uuid,
    ) -> Result<Vec<PaymentRefund>, DatabaseError> {
        sqlx::query_as::<_, PaymentRefund>(&format!(
            "SELECT {} FROM payment_refunds WHERE payment_id = $1 ORDER BY created_at ASC",
            REFUND_COLUMNS
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Sum of all non-failed refunds for a payment.
    ///
    /// Always recomputed from persisted rows so out-of-order refund webhooks
    /// converge on the same total.
    pub async fn sum_refunds(&self, payment_id: Uuid) -> Result<BigDecimal, DatabaseError> {
        let (total,): (BigDecimal,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0) FROM payment_refunds \
             WHERE payment_id = $1 AND status <> 'failed'",
        )
        .bind(payment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(total)
    }
}
