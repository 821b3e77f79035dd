//! Webhook reconciliation
//!
//! Provider webhooks are the authoritative signal for asynchronous rails
//! and a confirmation channel for synchronous ones. Every event is verified
//! before any state is touched, logged into the (provider, event_id) ledger
//! for exactly-once effects, and folded into the payment state machine with
//! a monotonicity guard so redelivered or out-of-order events cannot move a
//! payment backwards.

use crate::database::error::DatabaseError;
use crate::database::payment_repository::{Payment, PaymentRepository};
use crate::database::webhook_repository::{WebhookEventRecord, WebhookRepository};
use crate::error::{AppError, DomainError};
use crate::payments::factory::GatewayFactory;
use crate::payments::types::{GatewayWebhook, PaymentStatus, ProviderName};
use crate::services::payment_orchestrator::PaymentOrchestrator;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("invalid webhook signature from {provider}")]
    InvalidSignature { provider: String },

    #[error("event {event_id} already processed")]
    AlreadyProcessed { event_id: String },

    #[error("unknown webhook provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("webhook processing failed: {message}")]
    Processing { message: String },
}

impl From<AppError> for WebhookProcessorError {
    fn from(err: AppError) -> Self {
        WebhookProcessorError::Processing {
            message: err.to_string(),
        }
    }
}

pub struct WebhookProcessor {
    payments: PaymentRepository,
    webhooks: WebhookRepository,
    orchestrator: Arc<PaymentOrchestrator>,
    gateways: Arc<GatewayFactory>,
}

impl WebhookProcessor {
    pub fn new(
        payments: PaymentRepository,
        webhooks: WebhookRepository,
        orchestrator: Arc<PaymentOrchestrator>,
        gateways: Arc<GatewayFactory>,
    ) -> Self {
        Self {
            payments,
            webhooks,
            orchestrator,
            gateways,
        }
    }

    /// Handle a Stripe webhook delivery.
    ///
    /// Signature verification happens on the raw body before anything else.
    /// Stripe supplies its own event ids, which feed the dedupe ledger
    /// directly.
    pub async fn process_stripe(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<(), WebhookProcessorError> {
        let gateway = self.gateways.get(ProviderName::Stripe).map_err(|_| {
            WebhookProcessorError::UnknownProvider {
                provider: "stripe".to_string(),
            }
        })?;

        let verification = gateway.verify_webhook(raw_body, signature).map_err(|e| {
            WebhookProcessorError::Processing {
                message: e.to_string(),
            }
        })?;
        if !verification.valid {
            return Err(WebhookProcessorError::InvalidSignature {
                provider: "stripe".to_string(),
            });
        }

        let event = gateway
            .parse_webhook(raw_body)
            .map_err(|e| WebhookProcessorError::Processing {
                message: e.to_string(),
            })?;

        let event_id = event
            .event_id
            .clone()
            .ok_or(WebhookProcessorError::Processing {
                message: "stripe event without id".to_string(),
            })?;

        let payment = match &event.provider_ref {
            Some(provider_ref) => {
                self.payments
                    .find_by_provider_ref("stripe", provider_ref)
                    .await?
            }
            None => None,
        };

        let record = self
            .webhooks
            .log_event(
                &event_id,
                "stripe",
                &event.event_type,
                event.payload.clone(),
                Some(signature),
                payment.as_ref().map(|p| p.id),
            )
            .await?;

        if record.status == "completed" {
            return Err(WebhookProcessorError::AlreadyProcessed { event_id });
        }

        match self.dispatch_stripe_event(&event, payment).await {
            Ok(()) => {
                self.webhooks.mark_processed(record.id).await?;
                Ok(())
            }
            Err(e) => {
                self.webhooks.record_failure(record.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    /// Handle a wallet callback (Swish, MobilePay, Vipps).
    ///
    /// Wallet callbacks don't always carry a provider event id, so the
    /// ledger key is derived from what the event means:
    /// `{provider}:{payment_id}:{raw_status}`. Redelivery of the same
    /// outcome dedupes; a different outcome for the same payment is a new
    /// event.
    pub async fn process_wallet(
        &self,
        provider: ProviderName,
        payment_id: Uuid,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<(), WebhookProcessorError> {
        let gateway = self.gateways.get(provider).map_err(|_| {
            WebhookProcessorError::UnknownProvider {
                provider: provider.to_string(),
            }
        })?;

        let verification = gateway.verify_webhook(raw_body, signature).map_err(|e| {
            WebhookProcessorError::Processing {
                message: e.to_string(),
            }
        })?;
        if !verification.valid {
            return Err(WebhookProcessorError::InvalidSignature {
                provider: provider.to_string(),
            });
        }

        let event = gateway
            .parse_webhook(raw_body)
            .map_err(|e| WebhookProcessorError::Processing {
                message: e.to_string(),
            })?;

        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| WebhookProcessorError::Processing {
                message: format!("payment {} not found for wallet callback", payment_id),
            })?;

        if payment.provider.as_deref() != Some(provider.as_str()) {
            return Err(WebhookProcessorError::Processing {
                message: format!(
                    "payment {} does not belong to provider {}",
                    payment_id, provider
                ),
            });
        }

        let raw_status =
            event
                .raw_status
                .clone()
                .ok_or(WebhookProcessorError::Processing {
                    message: "wallet callback without status".to_string(),
                })?;
        let event_id = format!("{}:{}:{}", provider, payment_id, raw_status);

        let record = self
            .webhooks
            .log_event(
                &event_id,
                provider.as_str(),
                &event.event_type,
                event.payload.clone(),
                Some(signature),
                Some(payment.id),
            )
            .await?;

        if record.status == "completed" {
            return Err(WebhookProcessorError::AlreadyProcessed { event_id });
        }

        let new_status = gateway.map_status(&raw_status);
        match self
            .apply_provider_status(&payment, new_status, event.failure_reason.as_deref())
            .await
        {
            Ok(()) => {
                self.webhooks.mark_processed(record.id).await?;
                Ok(())
            }
            Err(e) => {
                self.webhooks.record_failure(record.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn dispatch_stripe_event(
        &self,
        event: &GatewayWebhook,
        payment: Option<Payment>,
    ) -> Result<(), WebhookProcessorError> {
        match event.event_type.as_str() {
            "payment_intent.succeeded"
            | "payment_intent.payment_failed"
            | "payment_intent.requires_action"
            | "payment_intent.processing"
            | "payment_intent.canceled" => {
                let payment = payment.ok_or_else(|| WebhookProcessorError::Processing {
                    message: format!(
                        "no payment for stripe reference {:?}",
                        event.provider_ref
                    ),
                })?;
                let raw_status =
                    event
                        .raw_status
                        .as_deref()
                        .ok_or(WebhookProcessorError::Processing {
                            message: "stripe intent event without status".to_string(),
                        })?;
                let gateway = self.gateways.get(ProviderName::Stripe).map_err(|e| {
                    WebhookProcessorError::Processing {
                        message: e.to_string(),
                    }
                })?;
                let new_status = gateway.map_status(raw_status);
                self.apply_provider_status(&payment, new_status, event.failure_reason.as_deref())
                    .await
            }
            "refund.created" | "refund.updated" | "charge.refunded" => {
                let payment = payment.ok_or_else(|| WebhookProcessorError::Processing {
                    message: format!(
                        "no payment for stripe refund reference {:?}",
                        event.provider_ref
                    ),
                })?;
                self.reconcile_refund_event(&payment, event).await
            }
            other => {
                // Verified but not one we act on; ack so it isn't retried
                info!(event_type = other, "ignoring unsupported stripe event");
                Ok(())
            }
        }
    }

    /// Fold a provider-reported status into the payment, refusing to move
    /// backwards. Stale signals and already-applied transitions are acked
    /// as no-ops; only genuinely inapplicable transitions fail.
    async fn apply_provider_status(
        &self,
        payment: &Payment,
        new_status: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), WebhookProcessorError> {
        let current = PaymentStatus::from_str(&payment.status).map_err(|e| {
            WebhookProcessorError::Processing {
                message: e.to_string(),
            }
        })?;

        if new_status.rank() <= current.rank() {
            info!(
                payment_id = %payment.id,
                current = %current,
                reported = %new_status,
                "stale webhook status, no-op"
            );
            return Ok(());
        }

        match self
            .orchestrator
            .apply_status(payment, new_status, failure_reason)
            .await
        {
            Ok(updated) => {
                if current != PaymentStatus::Succeeded && new_status == PaymentStatus::Succeeded {
                    self.orchestrator.handle_successful_payment(&updated).await?;
                }
                Ok(())
            }
            // A racer applied the same or a later status between our read
            // and write; the ledger entry is still consumed.
            Err(AppError {
                kind: crate::error::AppErrorKind::Domain(DomainError::InvalidState { .. }),
                ..
            }) => {
                warn!(
                    payment_id = %payment.id,
                    reported = %new_status,
                    "transition lost to concurrent writer, acking event"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Upsert the refund row a Stripe refund event describes, then
    /// recompute the payment's refund totals from persisted rows.
    async fn reconcile_refund_event(
        &self,
        payment: &Payment,
        event: &GatewayWebhook,
    ) -> Result<(), WebhookProcessorError> {
        let refund_ref =
            event
                .refund_ref
                .as_deref()
                .ok_or(WebhookProcessorError::Processing {
                    message: "stripe refund event without refund id".to_string(),
                })?;

        let refund_status = match event.raw_status.as_deref() {
            Some("succeeded") => "succeeded",
            Some("failed") | Some("canceled") => "failed",
            _ => "pending",
        };

        match self.payments.find_refund_by_provider_ref(refund_ref).await? {
            Some(existing) => {
                if existing.status != refund_status {
                    self.payments
                        .update_refund_status(existing.id, refund_status)
                        .await?;
                }
            }
            None => {
                let amount = event.amount.clone().ok_or(
                    WebhookProcessorError::Processing {
                        message: "stripe refund event without amount".to_string(),
                    },
                )?;
                self.payments
                    .insert_refund(
                        payment.id,
                        amount,
                        &payment.currency,
                        None,
                        None,
                        refund_status,
                        Some(refund_ref),
                    )
                    .await?;
            }
        }

        self.orchestrator.reconcile_refund_totals(payment).await?;
        Ok(())
    }

    /// Retry events that failed processing but still have retry budget.
    /// Signatures were verified at ingestion; this path re-dispatches from
    /// the stored payload.
    pub async fn retry_pending(&self, limit: i64) -> Result<usize, WebhookProcessorError> {
        let pending = self.webhooks.get_pending_events(limit).await?;
        let mut processed = 0;

        for record in pending {
            match self.redispatch(&record).await {
                Ok(()) => {
                    self.webhooks.mark_processed(record.id).await?;
                    processed += 1;
                }
                Err(e) => {
                    warn!(
                        event_id = %record.event_id,
                        provider = %record.provider,
                        error = %e,
                        "webhook retry failed"
                    );
                    self.webhooks.record_failure(record.id, &e.to_string()).await?;
                }
            }
        }

        Ok(processed)
    }

    async fn redispatch(&self, record: &WebhookEventRecord) -> Result<(), WebhookProcessorError> {
        let provider = ProviderName::from_str(&record.provider).map_err(|_| {
            WebhookProcessorError::UnknownProvider {
                provider: record.provider.clone(),
            }
        })?;
        let gateway =
            self.gateways
                .get(provider)
                .map_err(|_| WebhookProcessorError::UnknownProvider {
                    provider: record.provider.clone(),
                })?;

        let raw = serde_json::to_vec(&record.payload).map_err(|e| {
            WebhookProcessorError::Processing {
                message: format!("stored payload not serializable: {}", e),
            }
        })?;
        let event = gateway
            .parse_webhook(&raw)
            .map_err(|e| WebhookProcessorError::Processing {
                message: e.to_string(),
            })?;

        match provider {
            ProviderName::Stripe => {
                let payment = match &event.provider_ref {
                    Some(provider_ref) => {
                        self.payments
                            .find_by_provider_ref("stripe", provider_ref)
                            .await?
                    }
                    None => None,
                };
                self.dispatch_stripe_event(&event, payment).await
            }
            _ => {
                let payment_id =
                    record
                        .payment_id
                        .ok_or(WebhookProcessorError::Processing {
                            message: "wallet event without payment id".to_string(),
                        })?;
                let payment = self.payments.find_by_id(payment_id).await?.ok_or_else(|| {
                    WebhookProcessorError::Processing {
                        message: format!("payment {} not found", payment_id),
                    }
                })?;
                let raw_status =
                    event
                        .raw_status
                        .clone()
                        .ok_or(WebhookProcessorError::Processing {
                            message: "wallet event without status".to_string(),
                        })?;
                let new_status = gateway.map_status(&raw_status);
                self.apply_provider_status(&payment, new_status, event.failure_reason.as_deref())
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_identify_the_failure() {
        let err = WebhookProcessorError::InvalidSignature {
            provider: "stripe".to_string(),
        };
        assert!(err.to_string().contains("stripe"));

        let err = WebhookProcessorError::AlreadyProcessed {
            event_id: "evt_1".to_string(),
        };
        assert!(err.to_string().contains("evt_1"));
    }

    #[test]
    fn wallet_event_keys_distinguish_outcomes() {
        let payment_id = Uuid::new_v4();
        let paid = format!("{}:{}:{}", ProviderName::Swish, payment_id, "PAID");
        let declined = format!("{}:{}:{}", ProviderName::Swish, payment_id, "DECLINED");
        assert_ne!(paid, declined);
        assert!(paid.starts_with("swish:"));
    }
}
