use crate::database::error::DatabaseError;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

/// Escrow account entity
///
/// `funded_amount`, `released_amount` and `refunded_amount` are running
/// totals; the derived invariants (funded <= escrow_amount,
/// released + refunded <= funded) are enforced by the conditional updates
/// below, never by in-memory bookkeeping alone.
#[derive(Debug, Clone, FromRow)]
pub struct EscrowAccount {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub escrow_amount: BigDecimal,
    pub funded_amount: BigDecimal,
    pub released_amount: BigDecimal,
    pub refunded_amount: BigDecimal,
    pub currency: String,
    pub status: String,
    pub auto_release_at: Option<chrono::DateTime<chrono::Utc>>,
    pub release_conditions: serde_json::Value,
    pub provider_account_ref: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const ESCROW_COLUMNS: &str = "id, transaction_id, user_id, escrow_amount, funded_amount, \
     released_amount, refunded_amount, currency, status, auto_release_at, \
     release_conditions, provider_account_ref, created_at, updated_at";

/// Repository for escrow accounts
pub struct EscrowRepository {
    pool: PgPool,
}

impl EscrowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an escrow account in `created` status.
    ///
    /// The unique constraint on transaction_id makes concurrent creation a
    /// database-level conflict rather than a lost update.
    pub async fn create(
        &self,
        transaction_id: Uuid,
        user_id: Uuid,
        escrow_amount: BigDecimal,
        currency: &str,
        auto_release_at: Option<chrono::DateTime<chrono::Utc>>,
        release_conditions: serde_json::Value,
    ) -> Result<EscrowAccount, DatabaseError> {
        sqlx::query_as::<_, EscrowAccount>(&format!(
            "INSERT INTO escrow_accounts \
             (transaction_id, user_id, escrow_amount, currency, auto_release_at, \
              release_conditions, status) \
             VALUES ($1, $2, $3, $4, $5, $6, 'created') \
             RETURNING {}",
            ESCROW_COLUMNS
        ))
        .bind(transaction_id)
        .bind(user_id)
        .bind(escrow_amount)
        .bind(currency)
        .bind(auto_release_at)
        .bind(release_conditions)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<EscrowAccount>, DatabaseError> {
        sqlx::query_as::<_, EscrowAccount>(&format!(
            "SELECT {} FROM escrow_accounts WHERE id = $1",
            ESCROW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<EscrowAccount>, DatabaseError> {
        sqlx::query_as::<_, EscrowAccount>(&format!(
            "SELECT {} FROM escrow_accounts WHERE transaction_id = $1",
            ESCROW_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Apply funding to an escrow account still in `created` status.
    ///
    /// The guard re-checks status and the over-funding bound inside the
    /// UPDATE; `None` means a concurrent writer got there first or the
    /// invariant would be violated.
    pub async fn fund(
        &self,
        id: Uuid,
        amount: BigDecimal,
    ) -> Result<Option<EscrowAccount>, DatabaseError> {
        sqlx::query_as::<_, EscrowAccount>(&format!(
            "UPDATE escrow_accounts \
             SET funded_amount = funded_amount + $2, \
                 status = CASE WHEN funded_amount + $2 >= escrow_amount \
                     THEN 'funded' ELSE status END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'created' \
               AND funded_amount + $2 <= escrow_amount \
             RETURNING {}",
            ESCROW_COLUMNS
        ))
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Release funds to the beneficiary.
    ///
    /// Allowed from `funded` or `partial_release`; the bound is the funded
    /// amount minus whatever was already released or refunded. Full release
    /// moves the account to `released`.
    pub async fn release(
        &self,
        id: Uuid,
        amount: BigDecimal,
    ) -> Result<Option<EscrowAccount>, DatabaseError> {
        sqlx::query_as::<_, EscrowAccount>(&format!(
            "UPDATE escrow_accounts \
             SET released_amount = released_amount + $2, \
                 status = CASE WHEN released_amount + $2 >= funded_amount - refunded_amount \
                     THEN 'released' ELSE 'partial_release' END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status IN ('funded', 'partial_release') \
               AND released_amount + $2 <= funded_amount - refunded_amount \
             RETURNING {}",
            ESCROW_COLUMNS
        ))
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Refund funds back to the buyer. Terminal: the account moves to
    /// `refunded` and no further release can win its guard.
    pub async fn refund(
        &self,
        id: Uuid,
        amount: BigDecimal,
    ) -> Result<Option<EscrowAccount>, DatabaseError> {
        sqlx::query_as::<_, EscrowAccount>(&format!(
            "UPDATE escrow_accounts \
             SET refunded_amount = refunded_amount + $2, \
                 status = 'refunded', \
                 updated_at = NOW() \
             WHERE id = $1 AND status IN ('funded', 'partial_release') \
               AND refunded_amount + $2 <= funded_amount - released_amount \
             RETURNING {}",
            ESCROW_COLUMNS
        ))
        .bind(id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Funded escrow accounts whose auto-release deadline has passed
    pub async fn find_due_for_auto_release(
        &self,
        limit: i64,
    ) -> Result<Vec<EscrowAccount>, DatabaseError> {
        sqlx::query_as::<_, EscrowAccount>(&format!(
            "SELECT {} FROM escrow_accounts \
             WHERE status = 'funded' AND auto_release_at IS NOT NULL \
               AND auto_release_at <= NOW() \
             ORDER BY auto_release_at ASC \
             LIMIT $1",
            ESCROW_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
