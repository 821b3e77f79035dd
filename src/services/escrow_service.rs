//! Escrow lifecycle management
//!
//! An escrow account shadows a transaction: created when the parties agree,
//! funded by the captured payment, then drained by releases to the seller
//! and/or refunds to the buyer. Balance invariants live in the conditional
//! updates in the repository; this module produces precise errors when a
//! guard would fail and wires in authorization and notifications.

use crate::database::escrow_repository::{EscrowAccount, EscrowRepository};
use crate::database::transaction_repository::TransactionRepository;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::payments::types::EscrowStatus;
use crate::services::notification_service::{NotificationKind, NotificationService};
use crate::services::payment_orchestrator::FeeBreakdown;
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{Duration, Utc};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

/// Who is performing an escrow operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    User,
    Admin,
    System,
}

#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: Option<Uuid>,
    pub role: ActorRole,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            role: ActorRole::User,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            role: ActorRole::Admin,
        }
    }

    /// Background workers (auto-release)
    pub fn system() -> Self {
        Self {
            user_id: None,
            role: ActorRole::System,
        }
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, ActorRole::Admin | ActorRole::System)
    }
}

/// Outcome of one auto-release sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoReleaseOutcome {
    pub released: usize,
    pub failed: usize,
}

pub struct EscrowManager {
    escrows: EscrowRepository,
    transactions: TransactionRepository,
    notifier: NotificationService,
    auto_release_days: i64,
}

impl EscrowManager {
    pub fn new(
        escrows: EscrowRepository,
        transactions: TransactionRepository,
        notifier: NotificationService,
        auto_release_days: i64,
    ) -> Self {
        Self {
            escrows,
            transactions,
            notifier,
            auto_release_days,
        }
    }

    /// Create the escrow account for a transaction.
    ///
    /// Either party may create it; the seller is always the beneficiary.
    /// The unique constraint on transaction_id catches concurrent creation.
    pub async fn create_escrow_account(
        &self,
        actor: Actor,
        transaction_id: Uuid,
        release_conditions: Option<serde_json::Value>,
    ) -> AppResult<EscrowAccount> {
        let transaction = self
            .transactions
            .find_by_id(transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TransactionNotFound {
                    transaction_id: transaction_id.to_string(),
                })
            })?;

        if !actor.is_privileged() {
            let caller = actor.user_id.unwrap_or_default();
            if caller != transaction.buyer_id && caller != transaction.seller_id {
                return Err(AppError::domain(DomainError::NotAuthorized {
                    user_id: caller.to_string(),
                    action: "create an escrow account for this transaction".to_string(),
                }));
            }
        }

        if transaction.amount <= BigDecimal::from(0) {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: transaction.amount.to_string(),
                reason: "escrow amount must be greater than zero".to_string(),
            }));
        }

        if self
            .escrows
            .find_by_transaction(transaction_id)
            .await?
            .is_some()
        {
            return Err(AppError::domain(DomainError::EscrowAlreadyExists {
                transaction_id: transaction_id.to_string(),
            }));
        }

        let auto_release_at = Utc::now() + Duration::days(self.auto_release_days);
        let created = self
            .escrows
            .create(
                transaction_id,
                transaction.seller_id,
                transaction.amount.clone(),
                &transaction.currency,
                Some(auto_release_at),
                release_conditions.unwrap_or_else(|| serde_json::json!({})),
            )
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AppError::domain(DomainError::EscrowAlreadyExists {
                        transaction_id: transaction_id.to_string(),
                    })
                } else {
                    e.into()
                }
            })?;

        info!(
            escrow_id = %created.id,
            transaction_id = %transaction_id,
            amount = %created.escrow_amount,
            auto_release_at = %auto_release_at,
            "escrow account created"
        );

        Ok(created)
    }

    /// Apply funding from a captured payment.
    ///
    /// Single-shot: funding lands while the account is `created` and must
    /// not exceed the target. A lost guard after our pre-checks means a
    /// concurrent writer moved the account first.
    pub async fn fund_escrow_account(
        &self,
        escrow_id: Uuid,
        amount: BigDecimal,
    ) -> AppResult<EscrowAccount> {
        let escrow = self.get_escrow_account(escrow_id).await?;
        validate_funding(&escrow, &amount)?;

        self.escrows
            .fund(escrow_id, amount)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::InvalidState {
                    entity: "escrow".to_string(),
                    current: escrow.status.clone(),
                    requested: EscrowStatus::Funded.to_string(),
                })
            })
    }

    /// Release escrowed funds to the seller.
    ///
    /// Buyers release when satisfied, admins and the auto-release worker
    /// when policy says so. Omitting the amount releases everything still
    /// held. Full release completes the transaction.
    pub async fn release_escrow_funds(
        &self,
        actor: Actor,
        escrow_id: Uuid,
        amount: Option<BigDecimal>,
    ) -> AppResult<EscrowAccount> {
        let escrow = self.get_escrow_account(escrow_id).await?;
        self.authorize_party(actor, &escrow, "release escrow funds")
            .await?;

        let status = parse_escrow_status(&escrow)?;
        if !matches!(status, EscrowStatus::Funded | EscrowStatus::PartialRelease) {
            return Err(AppError::domain(DomainError::InvalidState {
                entity: "escrow".to_string(),
                current: escrow.status.clone(),
                requested: EscrowStatus::Released.to_string(),
            }));
        }

        let available = &escrow.funded_amount - &escrow.released_amount - &escrow.refunded_amount;
        let requested = amount.unwrap_or_else(|| available.clone());

        if requested <= BigDecimal::from(0) {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: requested.to_string(),
                reason: "release amount must be greater than zero".to_string(),
            }));
        }
        if requested > available {
            return Err(AppError::domain(DomainError::OverRelease {
                requested: requested.to_string(),
                available: available.to_string(),
            }));
        }

        let updated = self
            .escrows
            .release(escrow_id, requested.clone())
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::InvalidState {
                    entity: "escrow".to_string(),
                    current: escrow.status.clone(),
                    requested: EscrowStatus::Released.to_string(),
                })
            })?;

        info!(
            escrow_id = %updated.id,
            amount = %requested,
            status = %updated.status,
            "escrow funds released"
        );

        if updated.status == EscrowStatus::Released.as_str() {
            let transaction = self
                .transactions
                .update_status_if(updated.transaction_id, &["escrow_funded"], "completed")
                .await?;

            if let Some(transaction) = transaction {
                self.notifier.notify(
                    transaction.seller_id,
                    NotificationKind::EscrowReleased,
                    "Funds released",
                    "The escrowed funds for your sale have been released.",
                    Some(serde_json::json!({ "escrow_id": updated.id })),
                );
            }
        }

        Ok(updated)
    }

    /// Refund escrowed funds back to the buyer. Terminal for the account.
    pub async fn refund_escrow_funds(
        &self,
        actor: Actor,
        escrow_id: Uuid,
        amount: Option<BigDecimal>,
    ) -> AppResult<EscrowAccount> {
        let escrow = self.get_escrow_account(escrow_id).await?;
        self.authorize_party(actor, &escrow, "refund escrow funds")
            .await?;

        let status = parse_escrow_status(&escrow)?;
        if !matches!(status, EscrowStatus::Funded | EscrowStatus::PartialRelease) {
            return Err(AppError::domain(DomainError::InvalidState {
                entity: "escrow".to_string(),
                current: escrow.status.clone(),
                requested: EscrowStatus::Refunded.to_string(),
            }));
        }

        let available = &escrow.funded_amount - &escrow.released_amount - &escrow.refunded_amount;
        let requested = amount.unwrap_or_else(|| available.clone());

        if requested <= BigDecimal::from(0) {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: requested.to_string(),
                reason: "refund amount must be greater than zero".to_string(),
            }));
        }
        if requested > available {
            return Err(AppError::domain(DomainError::OverRefund {
                requested: requested.to_string(),
                available: available.to_string(),
            }));
        }

        let updated = self
            .escrows
            .refund(escrow_id, requested.clone())
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::InvalidState {
                    entity: "escrow".to_string(),
                    current: escrow.status.clone(),
                    requested: EscrowStatus::Refunded.to_string(),
                })
            })?;

        info!(
            escrow_id = %updated.id,
            amount = %requested,
            "escrow funds refunded"
        );

        let transaction = self
            .transactions
            .update_status_if(updated.transaction_id, &["escrow_funded"], "refunded")
            .await?;

        if let Some(transaction) = transaction {
            self.notifier.notify(
                transaction.buyer_id,
                NotificationKind::EscrowRefunded,
                "Escrow refunded",
                "The escrowed funds are being returned to you.",
                Some(serde_json::json!({ "escrow_id": updated.id })),
            );
        }

        Ok(updated)
    }

    /// One sweep of the auto-release worker: release every funded account
    /// whose deadline has passed. A single failing account is alerted and
    /// skipped so the rest of the batch still goes through.
    pub async fn process_auto_release(&self, batch_size: i64) -> AppResult<AutoReleaseOutcome> {
        let due = self.escrows.find_due_for_auto_release(batch_size).await?;
        let mut outcome = AutoReleaseOutcome::default();

        for escrow in due {
            match self
                .release_escrow_funds(Actor::system(), escrow.id, None)
                .await
            {
                Ok(_) => outcome.released += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(escrow_id = %escrow.id, error = %e, "auto-release failed");
                    self.notifier.notify_ops(
                        "escrow auto-release failure",
                        &format!("escrow {}: {}", escrow.id, e),
                    );
                }
            }
        }

        if outcome.released > 0 || outcome.failed > 0 {
            info!(
                released = outcome.released,
                failed = outcome.failed,
                "auto-release sweep finished"
            );
        }

        Ok(outcome)
    }

    pub async fn get_escrow_account(&self, escrow_id: Uuid) -> AppResult<EscrowAccount> {
        self.escrows.find_by_id(escrow_id).await?.ok_or_else(|| {
            AppError::domain(DomainError::EscrowNotFound {
                escrow_id: escrow_id.to_string(),
            })
        })
    }

    pub async fn find_by_transaction(
        &self,
        transaction_id: Uuid,
    ) -> AppResult<Option<EscrowAccount>> {
        Ok(self.escrows.find_by_transaction(transaction_id).await?)
    }

    async fn authorize_party(
        &self,
        actor: Actor,
        escrow: &EscrowAccount,
        action: &str,
    ) -> AppResult<()> {
        if actor.is_privileged() {
            return Ok(());
        }
        let caller = actor.user_id.unwrap_or_default();
        let transaction = self
            .transactions
            .find_by_id(escrow.transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TransactionNotFound {
                    transaction_id: escrow.transaction_id.to_string(),
                })
            })?;

        if caller != transaction.buyer_id && caller != transaction.seller_id {
            return Err(AppError::domain(DomainError::NotAuthorized {
                user_id: caller.to_string(),
                action: action.to_string(),
            }));
        }
        Ok(())
    }
}

/// Funding is only valid while the account is `created` and may not push
/// the funded balance past the target amount.
fn validate_funding(escrow: &EscrowAccount, amount: &BigDecimal) -> AppResult<()> {
    let status = parse_escrow_status(escrow)?;

    if status != EscrowStatus::Created {
        return Err(AppError::domain(DomainError::InvalidState {
            entity: "escrow".to_string(),
            current: escrow.status.clone(),
            requested: EscrowStatus::Funded.to_string(),
        }));
    }
    if *amount <= BigDecimal::from(0) {
        return Err(AppError::validation(ValidationError::InvalidAmount {
            amount: amount.to_string(),
            reason: "funding amount must be greater than zero".to_string(),
        }));
    }
    if &escrow.funded_amount + amount > escrow.escrow_amount {
        return Err(AppError::domain(DomainError::OverFunding {
            requested: amount.to_string(),
            target: escrow.escrow_amount.to_string(),
        }));
    }

    Ok(())
}

fn parse_escrow_status(escrow: &EscrowAccount) -> AppResult<EscrowStatus> {
    EscrowStatus::from_str(&escrow.status).map_err(|_| {
        AppError::domain(DomainError::InvalidState {
            entity: "escrow".to_string(),
            current: escrow.status.clone(),
            requested: "parse".to_string(),
        })
    })
}

/// Escrow service fee: 0.5% of the held amount with a per-currency floor.
pub fn calculate_escrow_fees(amount: &BigDecimal, currency: crate::payments::types::Currency) -> FeeBreakdown {
    use crate::payments::types::Currency;

    let floor = match currency {
        Currency::Sek | Currency::Nok | Currency::Dkk => BigDecimal::new(BigInt::from(1000), 2),
        Currency::Eur | Currency::Usd => BigDecimal::new(BigInt::from(500), 2),
        Currency::Gbp => BigDecimal::new(BigInt::from(400), 2),
    };

    let pct = (amount * BigDecimal::from(50) / BigDecimal::from(10_000))
        .with_scale_round(2, RoundingMode::HalfUp);
    let fee_amount = if pct < floor { floor } else { pct };
    let total_amount = (amount + &fee_amount).with_scale_round(2, RoundingMode::HalfUp);

    FeeBreakdown {
        base_amount: amount.with_scale_round(2, RoundingMode::HalfUp),
        fee_amount,
        total_amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::Currency;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn escrow_fee_is_half_a_percent() {
        let fees = calculate_escrow_fees(&dec("10000"), Currency::Sek);
        assert_eq!(fees.fee_amount, dec("50.00"));
        assert_eq!(fees.total_amount, dec("10050.00"));
    }

    #[test]
    fn escrow_fee_floor_applies_to_small_amounts() {
        assert_eq!(
            calculate_escrow_fees(&dec("100"), Currency::Sek).fee_amount,
            dec("10.00")
        );
        assert_eq!(
            calculate_escrow_fees(&dec("100"), Currency::Eur).fee_amount,
            dec("5.00")
        );
        assert_eq!(
            calculate_escrow_fees(&dec("100"), Currency::Gbp).fee_amount,
            dec("4.00")
        );
    }

    fn account_with(status: &str, target: &str, funded: &str) -> EscrowAccount {
        EscrowAccount {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            escrow_amount: dec(target),
            funded_amount: dec(funded),
            released_amount: dec("0"),
            refunded_amount: dec("0"),
            currency: "SEK".to_string(),
            status: status.to_string(),
            auto_release_at: None,
            release_conditions: serde_json::json!({}),
            provider_account_ref: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn funding_only_lands_on_created_accounts() {
        let created = account_with("created", "1000", "0");
        assert!(validate_funding(&created, &dec("1000")).is_ok());

        let funded = account_with("funded", "1000", "1000");
        assert!(validate_funding(&funded, &dec("1000")).is_err());

        let released = account_with("released", "1000", "1000");
        assert!(validate_funding(&released, &dec("1")).is_err());
    }

    #[test]
    fn funding_cannot_exceed_the_target_amount() {
        let account = account_with("created", "1000", "0");
        assert!(validate_funding(&account, &dec("1000.01")).is_err());
        assert!(validate_funding(&account, &dec("0")).is_err());
        assert!(validate_funding(&account, &dec("-5")).is_err());
    }

    #[test]
    fn actor_roles_gate_privilege() {
        let buyer = Actor::user(Uuid::new_v4());
        assert!(!buyer.is_privileged());
        assert!(Actor::admin(Uuid::new_v4()).is_privileged());
        assert!(Actor::system().is_privileged());
        assert_eq!(Actor::system().user_id, None);
    }
}
