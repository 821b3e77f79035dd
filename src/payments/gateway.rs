use crate::payments::error::PaymentResult;
use crate::payments::types::{
    Currency, GatewayWebhook, IntentRequest, IntentResponse, PaymentStatus, ProviderName,
    RefundRequest, RefundResponse, StatusResponse, WebhookVerification,
};
use async_trait::async_trait;

/// Provider gateway adapter.
///
/// One implementation per external rail (Stripe for cards/SEPA, Swish,
/// MobilePay, Vipps). Orchestration code never sees raw provider statuses;
/// `map_status` is the single translation point and is total: anything the
/// adapter doesn't recognise maps to `Failed`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent / payment request at the provider
    async fn create_intent(&self, request: IntentRequest) -> PaymentResult<IntentResponse>;

    /// Confirm a previously created intent (synchronous rails only)
    async fn confirm_intent(
        &self,
        provider_ref: &str,
        payment_method_ref: Option<&str>,
    ) -> PaymentResult<StatusResponse>;

    /// Create a refund against a captured payment
    async fn create_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse>;

    /// Poll the provider for the current status
    async fn fetch_status(&self, provider_ref: &str) -> PaymentResult<StatusResponse>;

    fn name(&self) -> ProviderName;

    fn supported_currencies(&self) -> &'static [Currency];

    /// Translate a provider status string into the internal state machine.
    /// Pure and total; unknown statuses map to `Failed` (fail closed).
    fn map_status(&self, provider_status: &str) -> PaymentStatus;

    /// Verify the authenticity of a webhook before any state is touched
    fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> PaymentResult<WebhookVerification>;

    /// Parse a verified webhook body into a normalized event
    fn parse_webhook(&self, payload: &[u8]) -> PaymentResult<GatewayWebhook>;
}

impl std::fmt::Debug for dyn PaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentGateway({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_intent(&self, request: IntentRequest) -> PaymentResult<IntentResponse> {
            Ok(IntentResponse {
                provider: ProviderName::Stripe,
                provider_ref: format!("mock_{}", request.reference),
                status: PaymentStatus::RequiresConfirmation,
                raw_status: "requires_confirmation".to_string(),
                client_secret: Some("cs_mock".to_string()),
                redirect_url: None,
            })
        }

        async fn confirm_intent(
            &self,
            provider_ref: &str,
            _payment_method_ref: Option<&str>,
        ) -> PaymentResult<StatusResponse> {
            Ok(StatusResponse {
                provider_ref: provider_ref.to_string(),
                status: PaymentStatus::Succeeded,
                raw_status: "succeeded".to_string(),
                failure_reason: None,
            })
        }

        async fn create_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
            let _ = request;
            Ok(RefundResponse {
                provider_refund_ref: "re_mock".to_string(),
                status: PaymentStatus::Refunded,
                raw_status: "succeeded".to_string(),
            })
        }

        async fn fetch_status(&self, provider_ref: &str) -> PaymentResult<StatusResponse> {
            self.confirm_intent(provider_ref, None).await
        }

        fn name(&self) -> ProviderName {
            ProviderName::Stripe
        }

        fn supported_currencies(&self) -> &'static [Currency] {
            &[Currency::Sek, Currency::Eur]
        }

        fn map_status(&self, provider_status: &str) -> PaymentStatus {
            match provider_status {
                "succeeded" => PaymentStatus::Succeeded,
                _ => PaymentStatus::Failed,
            }
        }

        fn verify_webhook(
            &self,
            _payload: &[u8],
            _signature: &str,
        ) -> PaymentResult<WebhookVerification> {
            Ok(WebhookVerification {
                valid: true,
                reason: None,
            })
        }

        fn parse_webhook(&self, _payload: &[u8]) -> PaymentResult<GatewayWebhook> {
            Ok(GatewayWebhook {
                provider: ProviderName::Stripe,
                event_id: Some("evt_mock".to_string()),
                event_type: "payment_intent.succeeded".to_string(),
                provider_ref: Some("pi_mock".to_string()),
                refund_ref: None,
                raw_status: Some("succeeded".to_string()),
                amount: None,
                failure_reason: None,
                payload: serde_json::json!({}),
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);

        let intent = gateway
            .create_intent(IntentRequest {
                amount: BigDecimal::from(1000),
                currency: Currency::Sek,
                reference: "pay_1".to_string(),
                description: None,
                payer_phone: None,
                callback_url: None,
                metadata: None,
            })
            .await
            .expect("intent creation should succeed");
        assert_eq!(intent.status, PaymentStatus::RequiresConfirmation);
        assert_eq!(intent.provider_ref, "mock_pay_1");

        let confirmed = gateway
            .confirm_intent(&intent.provider_ref, None)
            .await
            .expect("confirmation should succeed");
        assert_eq!(confirmed.status, PaymentStatus::Succeeded);

        assert_eq!(gateway.map_status("anything-unknown"), PaymentStatus::Failed);
    }
}
