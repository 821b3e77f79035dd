use crate::database::error::DatabaseError;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Marketplace transaction entity
///
/// Owned by the wider marketplace; this service only reads the parties and
/// amount, and advances the status as payments and escrow move.
#[derive(Debug, Clone, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const TRANSACTION_COLUMNS: &str =
    "id, listing_id, buyer_id, seller_id, amount, currency, status, created_at, updated_at";

/// Repository for marketplace transactions
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Update transaction status
    pub async fn update_status(
        &self,
        id: Uuid,
        status: &str,
    ) -> Result<Transaction, DatabaseError> {
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions \
             SET status = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Conditionally update transaction status.
    ///
    /// Used on webhook-driven paths where the same event can be delivered
    /// more than once; `None` means the transaction had already moved on.
    pub async fn update_status_if(
        &self,
        id: Uuid,
        from_statuses: &[&str],
        to_status: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let from: Vec<String> = from_statuses.iter().map(|s| s.to_string()).collect();
        sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions \
             SET status = $2, updated_at = NOW() \
             WHERE id = $1 AND status = ANY($3) \
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .bind(to_status)
        .bind(from)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
