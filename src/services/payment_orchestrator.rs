//! Payment orchestration
//!
//! Drives a payment from creation through provider interaction to its
//! terminal state, and keeps the owning transaction and escrow account in
//! step. All state transitions go through conditional updates in the
//! repositories; this module decides what a failed guard means.

use crate::database::payment_repository::{Payment, PaymentRefund, PaymentRepository};
use crate::database::transaction_repository::TransactionRepository;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::payments::factory::GatewayFactory;
use crate::payments::types::{
    Currency, EscrowStatus, IntentRequest, PaymentMethod, PaymentStatus, RefundRequest,
};
use crate::services::escrow_service::{Actor, EscrowManager};
use crate::services::notification_service::{NotificationKind, NotificationService};
use bigdecimal::{BigDecimal, RoundingMode};
use bigdecimal::num_bigint::BigInt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub transaction_id: Uuid,
    pub payment_method: PaymentMethod,
    pub payer_phone: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Fee breakdown for a payment or escrow charge
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FeeBreakdown {
    pub base_amount: BigDecimal,
    pub fee_amount: BigDecimal,
    pub total_amount: BigDecimal,
}

pub struct PaymentOrchestrator {
    payments: PaymentRepository,
    escrow: Arc<EscrowManager>,
    transactions: TransactionRepository,
    gateways: Arc<GatewayFactory>,
    notifier: NotificationService,
}

impl PaymentOrchestrator {
    pub fn new(
        payments: PaymentRepository,
        escrow: Arc<EscrowManager>,
        transactions: TransactionRepository,
        gateways: Arc<GatewayFactory>,
        notifier: NotificationService,
    ) -> Self {
        Self {
            payments,
            escrow,
            transactions,
            gateways,
            notifier,
        }
    }

    /// Create a payment for a transaction.
    ///
    /// Only the buyer can pay, the method must support the transaction's
    /// currency, and a transaction can have at most one payment that isn't
    /// failed or cancelled. Card and SEPA payments get a provider intent
    /// immediately so the client receives a client secret; wallet payments
    /// stay `pending` until processing kicks off the app flow.
    pub async fn create_payment(
        &self,
        caller_id: Uuid,
        request: CreatePaymentRequest,
    ) -> AppResult<Payment> {
        let transaction = self
            .transactions
            .find_by_id(request.transaction_id)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::TransactionNotFound {
                    transaction_id: request.transaction_id.to_string(),
                })
            })?;

        if caller_id != transaction.buyer_id {
            return Err(AppError::domain(DomainError::NotAuthorized {
                user_id: caller_id.to_string(),
                action: "pay for this transaction".to_string(),
            }));
        }

        if transaction.amount <= BigDecimal::from(0) {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: transaction.amount.to_string(),
                reason: "amount must be greater than zero".to_string(),
            }));
        }

        let currency = Currency::from_str(&transaction.currency).map_err(|_| {
            AppError::validation(ValidationError::InvalidCurrency {
                currency: transaction.currency.clone(),
                reason: "not a supported settlement currency".to_string(),
            })
        })?;

        if !method_supports_currency(request.payment_method, currency) {
            return Err(AppError::validation(ValidationError::UnsupportedMethod {
                method: request.payment_method.to_string(),
                reason: format!("{} cannot settle {}", request.payment_method, currency),
            }));
        }

        if self
            .payments
            .find_active_by_transaction(transaction.id)
            .await?
            .is_some()
        {
            return Err(AppError::domain(DomainError::ActivePaymentExists {
                transaction_id: transaction.id.to_string(),
            }));
        }

        let mut metadata = request.metadata.unwrap_or_else(|| serde_json::json!({}));
        if let Some(phone) = &request.payer_phone {
            metadata["payer_phone"] = serde_json::json!(phone);
        }

        let payment = self
            .payments
            .create_payment(
                transaction.id,
                caller_id,
                transaction.amount.clone(),
                currency.as_str(),
                request.payment_method.as_str(),
                metadata,
            )
            .await?;

        info!(
            payment_id = %payment.id,
            transaction_id = %transaction.id,
            method = %request.payment_method,
            "payment created"
        );

        // Synchronous rails get their intent up front
        if !request.payment_method.is_wallet() {
            return self.start_provider_intent(&payment, currency).await;
        }

        Ok(payment)
    }

    /// Advance a payment by talking to its provider.
    ///
    /// First call on a wallet payment creates the provider payment request;
    /// subsequent calls (and the first call on card/SEPA payments that
    /// already hold an intent) confirm or poll, then fold the provider's
    /// answer into the state machine.
    pub async fn process_payment(
        &self,
        actor: Actor,
        payment_id: Uuid,
        payment_method_ref: Option<&str>,
    ) -> AppResult<Payment> {
        let payment = self.get_payment(payment_id).await?;
        ensure_payment_party(actor, &payment, "process this payment")?;
        let current = parse_payment_status(&payment)?;

        if current.is_terminal() {
            return Err(AppError::domain(DomainError::InvalidState {
                entity: "payment".to_string(),
                current: payment.status.clone(),
                requested: "processing".to_string(),
            }));
        }

        let method = PaymentMethod::from_str(&payment.payment_method).map_err(AppError::from)?;
        let currency = Currency::from_str(&payment.currency).map_err(AppError::from)?;

        if payment.provider_ref.is_none() {
            return self.start_provider_intent(&payment, currency).await;
        }

        let gateway = self.gateways.get_for_method(method)?;
        let provider_ref = payment.provider_ref.as_deref().unwrap_or_default();

        let status = if method.is_wallet() {
            gateway.fetch_status(provider_ref).await?
        } else {
            gateway.confirm_intent(provider_ref, payment_method_ref).await?
        };

        let updated = self
            .apply_status(&payment, status.status, status.failure_reason.as_deref())
            .await?;

        if current != PaymentStatus::Succeeded && status.status == PaymentStatus::Succeeded {
            self.handle_successful_payment(&updated).await?;
        }

        Ok(updated)
    }

    async fn start_provider_intent(
        &self,
        payment: &Payment,
        currency: Currency,
    ) -> AppResult<Payment> {
        let method = PaymentMethod::from_str(&payment.payment_method).map_err(AppError::from)?;
        let gateway = self.gateways.get_for_method(method)?;

        let payer_phone = payment
            .metadata
            .get("payer_phone")
            .and_then(|v| v.as_str())
            .map(String::from);

        let intent = gateway
            .create_intent(IntentRequest {
                amount: payment.amount.clone(),
                currency,
                reference: payment.id.to_string(),
                description: Some(format!("Hansa transaction {}", payment.transaction_id)),
                payer_phone,
                callback_url: None,
                metadata: Some(payment.metadata.clone()),
            })
            .await?;

        let updated = self
            .payments
            .set_provider_details(
                payment.id,
                gateway.name().as_str(),
                &intent.provider_ref,
                intent.client_secret.as_deref(),
                intent.status.as_str(),
            )
            .await?;

        info!(
            payment_id = %payment.id,
            provider = %gateway.name(),
            provider_ref = %intent.provider_ref,
            "provider intent created"
        );

        Ok(updated)
    }

    /// Fold a provider-reported status into the payment state machine.
    ///
    /// Same-state reports are idempotent no-ops. Disallowed transitions are
    /// conflicts. A lost conditional update means another writer moved the
    /// payment between our read and write, which is also a conflict.
    pub async fn apply_status(
        &self,
        payment: &Payment,
        new_status: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> AppResult<Payment> {
        let current = parse_payment_status(payment)?;

        if current == new_status {
            return Ok(payment.clone());
        }

        if !current.can_transition_to(new_status) {
            return Err(AppError::domain(DomainError::InvalidState {
                entity: "payment".to_string(),
                current: current.to_string(),
                requested: new_status.to_string(),
            }));
        }

        self.payments
            .transition_status(
                payment.id,
                &[current.as_str()],
                new_status.as_str(),
                failure_reason,
            )
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::InvalidState {
                    entity: "payment".to_string(),
                    current: current.to_string(),
                    requested: new_status.to_string(),
                })
            })
    }

    /// Post-capture side effects: advance the transaction and fund escrow.
    ///
    /// Re-runnable: the conditional transaction update only wins once, and
    /// escrow funding only applies while the account is still `created`, so
    /// a duplicate success signal changes nothing.
    pub async fn handle_successful_payment(&self, payment: &Payment) -> AppResult<()> {
        let advanced = self
            .transactions
            .update_status_if(payment.transaction_id, &["pending_payment"], "escrow_funded")
            .await?;

        let Some(transaction) = advanced else {
            info!(
                payment_id = %payment.id,
                transaction_id = %payment.transaction_id,
                "transaction already advanced, skipping escrow funding"
            );
            return Ok(());
        };

        if let Some(escrow) = self.escrow.find_by_transaction(transaction.id).await? {
            if escrow.status == EscrowStatus::Created.as_str() {
                match self
                    .escrow
                    .fund_escrow_account(escrow.id, payment.amount.clone())
                    .await
                {
                    Ok(funded) => {
                        info!(
                            escrow_id = %funded.id,
                            funded_amount = %funded.funded_amount,
                            status = %funded.status,
                            "escrow funded from captured payment"
                        );
                    }
                    // A concurrent writer moved the account between our read
                    // and the funding guard; leave it for reconciliation.
                    Err(AppError {
                        kind: AppErrorKind::Domain(DomainError::InvalidState { .. }),
                        ..
                    }) => {
                        warn!(
                            escrow_id = %escrow.id,
                            payment_id = %payment.id,
                            "escrow funding guard lost, leaving for reconciliation"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.notifier.notify(
            transaction.buyer_id,
            NotificationKind::PaymentSucceeded,
            "Payment received",
            "Your payment has been captured and is held in escrow.",
            Some(serde_json::json!({ "payment_id": payment.id })),
        );
        self.notifier.notify(
            transaction.seller_id,
            NotificationKind::EscrowFunded,
            "Escrow funded",
            "The buyer's payment has been captured into escrow.",
            Some(serde_json::json!({ "transaction_id": transaction.id })),
        );

        Ok(())
    }

    /// Issue a refund against a captured payment.
    ///
    /// The refundable balance is always the captured amount minus the sum of
    /// persisted non-failed refunds, so retried and out-of-order requests
    /// converge on the same bound.
    pub async fn create_refund(
        &self,
        actor: Actor,
        payment_id: Uuid,
        amount: Option<BigDecimal>,
        reason: Option<&str>,
    ) -> AppResult<PaymentRefund> {
        let payment = self.get_payment(payment_id).await?;
        ensure_payment_party(actor, &payment, "refund this payment")?;
        let current = parse_payment_status(&payment)?;

        if !matches!(
            current,
            PaymentStatus::Succeeded | PaymentStatus::PartiallyRefunded
        ) {
            return Err(AppError::domain(DomainError::InvalidState {
                entity: "payment".to_string(),
                current: payment.status.clone(),
                requested: "refund".to_string(),
            }));
        }

        let already_refunded = self.payments.sum_refunds(payment.id).await?;
        let refundable = &payment.amount - &already_refunded;
        let requested = amount.unwrap_or_else(|| refundable.clone());

        if requested <= BigDecimal::from(0) {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: requested.to_string(),
                reason: "refund amount must be greater than zero".to_string(),
            }));
        }
        if requested > refundable {
            return Err(AppError::domain(DomainError::RefundExceedsCaptured {
                requested: requested.to_string(),
                available: refundable.to_string(),
            }));
        }

        let method = PaymentMethod::from_str(&payment.payment_method).map_err(AppError::from)?;
        let currency = Currency::from_str(&payment.currency).map_err(AppError::from)?;
        let gateway = self.gateways.get_for_method(method)?;
        let provider_ref =
            payment
                .provider_ref
                .as_deref()
                .ok_or_else(|| {
                    AppError::domain(DomainError::InvalidState {
                        entity: "payment".to_string(),
                        current: "no provider reference".to_string(),
                        requested: "refund".to_string(),
                    })
                })?;

        let provider_refund = gateway
            .create_refund(RefundRequest {
                provider_ref: provider_ref.to_string(),
                amount: Some(requested.clone()),
                currency,
                reason: reason.map(String::from),
            })
            .await?;

        let refund_status = match provider_refund.status {
            PaymentStatus::Refunded | PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            _ => "pending",
        };

        let refund = self
            .payments
            .insert_refund(
                payment.id,
                requested.clone(),
                payment.currency.as_str(),
                reason,
                actor.user_id,
                refund_status,
                Some(&provider_refund.provider_refund_ref),
            )
            .await?;

        info!(
            payment_id = %payment.id,
            refund_id = %refund.id,
            amount = %requested,
            requested_by = ?actor.user_id,
            "refund created"
        );

        self.reconcile_refund_totals(&payment).await?;

        self.notifier.notify(
            payment.user_id,
            NotificationKind::RefundIssued,
            "Refund issued",
            "A refund for your payment is on its way.",
            Some(serde_json::json!({ "refund_id": refund.id, "amount": requested.to_string() })),
        );

        Ok(refund)
    }

    /// Recompute the refund total and move the payment to
    /// `partially_refunded` or `refunded` accordingly.
    pub async fn reconcile_refund_totals(&self, payment: &Payment) -> AppResult<Payment> {
        let total = self.payments.sum_refunds(payment.id).await?;

        let target = if total >= payment.amount {
            PaymentStatus::Refunded
        } else if total > BigDecimal::from(0) {
            PaymentStatus::PartiallyRefunded
        } else {
            return Ok(payment.clone());
        };

        let updated = self
            .payments
            .transition_status(
                payment.id,
                &[
                    PaymentStatus::Succeeded.as_str(),
                    PaymentStatus::PartiallyRefunded.as_str(),
                ],
                target.as_str(),
                None,
            )
            .await?;

        // Guard loss here means the payment is already at or past the target
        Ok(updated.unwrap_or_else(|| payment.clone()))
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> AppResult<Payment> {
        self.payments.find_by_id(payment_id).await?.ok_or_else(|| {
            AppError::domain(DomainError::PaymentNotFound {
                payment_id: payment_id.to_string(),
            })
        })
    }

    pub async fn list_refunds(&self, payment_id: Uuid) -> AppResult<Vec<PaymentRefund>> {
        let payment = self.get_payment(payment_id).await?;
        Ok(self.payments.list_refunds(payment.id).await?)
    }
}

/// Whether a payment method can settle a currency.
///
/// Cards and SEPA go through Stripe and cover all supported currencies;
/// each wallet is bound to its home market.
pub fn method_supports_currency(method: PaymentMethod, currency: Currency) -> bool {
    match method {
        PaymentMethod::Card | PaymentMethod::Sepa => true,
        PaymentMethod::Swish => currency == Currency::Sek,
        PaymentMethod::MobilePay => matches!(currency, Currency::Dkk | Currency::Eur),
        PaymentMethod::Vipps => currency == Currency::Nok,
    }
}

/// Payment mutations are reserved for the buyer who owns the payment,
/// admins, and the system (webhook reconciliation, workers).
pub(crate) fn ensure_payment_party(actor: Actor, payment: &Payment, action: &str) -> AppResult<()> {
    if actor.is_privileged() || actor.user_id == Some(payment.user_id) {
        return Ok(());
    }

    Err(AppError::domain(DomainError::NotAuthorized {
        user_id: actor
            .user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "anonymous".to_string()),
        action: action.to_string(),
    }))
}

fn parse_payment_status(payment: &Payment) -> AppResult<PaymentStatus> {
    PaymentStatus::from_str(&payment.status).map_err(|_| {
        AppError::domain(DomainError::InvalidState {
            entity: "payment".to_string(),
            current: payment.status.clone(),
            requested: "parse".to_string(),
        })
    })
}

/// Processing fee for a payment: a percentage in basis points plus a fixed
/// per-charge fee, both depending on method and currency. Rounded half-up
/// to two decimals.
pub fn calculate_payment_fees(
    amount: &BigDecimal,
    method: PaymentMethod,
    currency: Currency,
) -> FeeBreakdown {
    let (bps, fixed) = fee_schedule(method, currency);
    let fee_amount = (amount * BigDecimal::from(bps) / BigDecimal::from(10_000) + fixed)
        .with_scale_round(2, RoundingMode::HalfUp);
    let total_amount = (amount + &fee_amount).with_scale_round(2, RoundingMode::HalfUp);

    FeeBreakdown {
        base_amount: amount.with_scale_round(2, RoundingMode::HalfUp),
        fee_amount,
        total_amount,
    }
}

fn fee_schedule(method: PaymentMethod, currency: Currency) -> (i64, BigDecimal) {
    // (basis points, fixed fee in the charge currency)
    match method {
        PaymentMethod::Card => {
            let fixed = match currency {
                Currency::Sek | Currency::Nok | Currency::Dkk => cents(180),
                Currency::Eur => cents(25),
                Currency::Usd => cents(30),
                Currency::Gbp => cents(20),
            };
            (290, fixed)
        }
        PaymentMethod::Sepa => (80, cents(25)),
        PaymentMethod::Swish => (120, cents(100)),
        PaymentMethod::MobilePay => (145, cents(0)),
        PaymentMethod::Vipps => (140, cents(100)),
    }
}

fn cents(minor: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(minor), 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn card_fee_in_sek_matches_schedule() {
        let fees = calculate_payment_fees(&dec("1000"), PaymentMethod::Card, Currency::Sek);
        assert_eq!(fees.fee_amount, dec("30.80"));
        assert_eq!(fees.total_amount, dec("1030.80"));
    }

    #[test]
    fn sepa_fee_in_eur_matches_schedule() {
        let fees = calculate_payment_fees(&dec("1000"), PaymentMethod::Sepa, Currency::Eur);
        assert_eq!(fees.fee_amount, dec("8.25"));
    }

    #[test]
    fn wallet_fees_match_schedule() {
        let swish = calculate_payment_fees(&dec("500"), PaymentMethod::Swish, Currency::Sek);
        assert_eq!(swish.fee_amount, dec("7.00"));

        let mobilepay = calculate_payment_fees(&dec("500"), PaymentMethod::MobilePay, Currency::Dkk);
        assert_eq!(mobilepay.fee_amount, dec("7.25"));

        let vipps = calculate_payment_fees(&dec("500"), PaymentMethod::Vipps, Currency::Nok);
        assert_eq!(vipps.fee_amount, dec("8.00"));
    }

    #[test]
    fn fees_round_half_up() {
        // 123.45 * 2.9% = 3.58005 -> 3.58, plus 1.80 fixed
        let fees = calculate_payment_fees(&dec("123.45"), PaymentMethod::Card, Currency::Sek);
        assert_eq!(fees.fee_amount, dec("5.38"));
    }

    fn payment_owned_by(user_id: Uuid) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            user_id,
            amount: dec("1000"),
            currency: "SEK".to_string(),
            payment_method: "card".to_string(),
            status: "succeeded".to_string(),
            provider: Some("stripe".to_string()),
            provider_ref: Some("pi_1".to_string()),
            client_secret: None,
            failure_reason: None,
            metadata: serde_json::json!({}),
            authorized_at: None,
            captured_at: None,
            failed_at: None,
            refunded_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn refunds_require_the_buyer_or_a_privileged_actor() {
        let buyer = Uuid::new_v4();
        let payment = payment_owned_by(buyer);

        assert!(ensure_payment_party(Actor::user(buyer), &payment, "refund").is_ok());
        assert!(ensure_payment_party(Actor::admin(Uuid::new_v4()), &payment, "refund").is_ok());
        assert!(ensure_payment_party(Actor::system(), &payment, "refund").is_ok());

        let stranger = ensure_payment_party(Actor::user(Uuid::new_v4()), &payment, "refund");
        assert!(stranger.is_err());
    }

    #[test]
    fn method_currency_compatibility() {
        assert!(method_supports_currency(PaymentMethod::Card, Currency::Gbp));
        assert!(method_supports_currency(PaymentMethod::Swish, Currency::Sek));
        assert!(!method_supports_currency(PaymentMethod::Swish, Currency::Nok));
        assert!(method_supports_currency(PaymentMethod::MobilePay, Currency::Eur));
        assert!(method_supports_currency(PaymentMethod::MobilePay, Currency::Dkk));
        assert!(!method_supports_currency(PaymentMethod::MobilePay, Currency::Sek));
        assert!(method_supports_currency(PaymentMethod::Vipps, Currency::Nok));
        assert!(!method_supports_currency(PaymentMethod::Vipps, Currency::Usd));
    }
}
