use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::http::{verify_hmac_sha256_hex, PaymentHttpClient};
use crate::payments::types::{
    Currency, GatewayWebhook, IntentRequest, IntentResponse, PaymentStatus, ProviderName,
    RefundRequest, RefundResponse, StatusResponse, WebhookVerification,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MobilePayConfig {
    pub api_key: String,
    pub merchant_id: String,
    pub callback_url: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl MobilePayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_key =
            std::env::var("MOBILEPAY_API_KEY").map_err(|_| PaymentError::ValidationError {
                message: "MOBILEPAY_API_KEY environment variable is required".to_string(),
                field: Some("MOBILEPAY_API_KEY".to_string()),
            })?;
        let merchant_id =
            std::env::var("MOBILEPAY_MERCHANT_ID").map_err(|_| PaymentError::ValidationError {
                message: "MOBILEPAY_MERCHANT_ID environment variable is required".to_string(),
                field: Some("MOBILEPAY_MERCHANT_ID".to_string()),
            })?;
        let callback_url =
            std::env::var("MOBILEPAY_CALLBACK_URL").map_err(|_| PaymentError::ValidationError {
                message: "MOBILEPAY_CALLBACK_URL environment variable is required".to_string(),
                field: Some("MOBILEPAY_CALLBACK_URL".to_string()),
            })?;

        Ok(Self {
            base_url: std::env::var("MOBILEPAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.mobilepay.dk".to_string()),
            webhook_secret: std::env::var("MOBILEPAY_WEBHOOK_SECRET").ok(),
            timeout_secs: std::env::var("MOBILEPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("MOBILEPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            api_key,
            merchant_id,
            callback_url,
        })
    }
}

/// MobilePay app payments (Denmark and Finland, DKK/EUR). Amounts are
/// integer minor units. The payer approves in the app; outcome arrives
/// on the callback URL.
pub struct MobilePayGateway {
    config: MobilePayConfig,
    http: PaymentHttpClient,
}

impl MobilePayGateway {
    pub fn new(config: MobilePayConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MobilePayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn to_minor_units(amount: &BigDecimal) -> PaymentResult<i64> {
        (amount * BigDecimal::from(100))
            .with_scale(0)
            .to_i64()
            .ok_or(PaymentError::ValidationError {
                message: format!("amount out of range: {}", amount),
                field: Some("amount".to_string()),
            })
    }
}

#[async_trait]
impl PaymentGateway for MobilePayGateway {
    async fn create_intent(&self, request: IntentRequest) -> PaymentResult<IntentResponse> {
        if !self.supported_currencies().contains(&request.currency) {
            return Err(PaymentError::ValidationError {
                message: format!(
                    "MobilePay supports DKK and EUR, got {}",
                    request.currency.as_str()
                ),
                field: Some("currency".to_string()),
            });
        }

        let idempotency_key = Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "amount": Self::to_minor_units(&request.amount)?,
            "currencyCode": request.currency.as_str(),
            "paymentPointId": self.config.merchant_id,
            "reference": request.reference,
            "redirectUri": request.callback_url.as_deref().unwrap_or(&self.config.callback_url),
            "description": request.description.as_deref().unwrap_or(""),
        });

        let payment: MobilePayPayment = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payments"),
                Some(&self.config.api_key),
                Some(&body),
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;

        info!(payment_id = %payment.payment_id, "mobilepay payment created");

        Ok(IntentResponse {
            provider: ProviderName::MobilePay,
            provider_ref: payment.payment_id,
            status: self.map_status(&payment.state),
            raw_status: payment.state,
            client_secret: None,
            redirect_url: payment.mobile_pay_app_redirect_uri,
        })
    }

    async fn confirm_intent(
        &self,
        provider_ref: &str,
        _payment_method_ref: Option<&str>,
    ) -> PaymentResult<StatusResponse> {
        self.fetch_status(provider_ref).await
    }

    async fn create_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let amount = request
            .amount
            .as_ref()
            .ok_or(PaymentError::ValidationError {
                message: "MobilePay refunds require an explicit amount".to_string(),
                field: Some("amount".to_string()),
            })?;

        let idempotency_key = Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "paymentId": request.provider_ref,
            "amount": Self::to_minor_units(amount)?,
            "reference": request.reason.as_deref().unwrap_or("refund"),
        });

        let refund: MobilePayRefund = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                Some(&self.config.api_key),
                Some(&body),
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;

        Ok(RefundResponse {
            provider_refund_ref: refund.refund_id,
            status: PaymentStatus::Processing,
            raw_status: refund.state,
        })
    }

    async fn fetch_status(&self, provider_ref: &str) -> PaymentResult<StatusResponse> {
        let payment: MobilePayPayment = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payments/{}", provider_ref)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;

        Ok(StatusResponse {
            provider_ref: payment.payment_id,
            status: self.map_status(&payment.state),
            raw_status: payment.state,
            failure_reason: None,
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::MobilePay
    }

    fn supported_currencies(&self) -> &'static [Currency] {
        &[Currency::Dkk, Currency::Eur]
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status {
            "initiated" => PaymentStatus::Processing,
            "reserved" => PaymentStatus::Processing,
            "captured" => PaymentStatus::Succeeded,
            "cancelled" => PaymentStatus::Cancelled,
            "expired" | "rejected" => PaymentStatus::Failed,
            _ => PaymentStatus::Failed,
        }
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerification> {
        match &self.config.webhook_secret {
            Some(secret) => {
                let valid = verify_hmac_sha256_hex(payload, secret, signature);
                Ok(WebhookVerification {
                    valid,
                    reason: if valid {
                        None
                    } else {
                        Some("HMAC signature mismatch".to_string())
                    },
                })
            }
            None => Ok(WebhookVerification {
                valid: true,
                reason: Some("no webhook secret configured, relying on transport auth".to_string()),
            }),
        }
    }

    fn parse_webhook(&self, payload: &[u8]) -> PaymentResult<GatewayWebhook> {
        let body: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid webhook JSON: {}", e),
                field: Some("payload".to_string()),
            })?;

        let provider_ref = body
            .get("paymentId")
            .and_then(|v| v.as_str())
            .map(String::from);
        let raw_status = body
            .get("state")
            .and_then(|v| v.as_str())
            .map(String::from);
        let amount = body
            .get("amount")
            .and_then(|v| v.as_i64())
            .map(|minor| BigDecimal::from(minor) / BigDecimal::from(100));

        Ok(GatewayWebhook {
            provider: ProviderName::MobilePay,
            event_id: body
                .get("notificationId")
                .and_then(|v| v.as_str())
                .map(String::from),
            event_type: "payment.callback".to_string(),
            provider_ref,
            refund_ref: None,
            raw_status,
            amount,
            failure_reason: None,
            payload: body,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MobilePayPayment {
    payment_id: String,
    state: String,
    mobile_pay_app_redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MobilePayRefund {
    refund_id: String,
    state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> MobilePayGateway {
        MobilePayGateway::new(MobilePayConfig {
            api_key: "key".to_string(),
            merchant_id: "pp_1".to_string(),
            callback_url: "https://example.test/webhooks/mobilepay".to_string(),
            webhook_secret: None,
            base_url: "https://mobilepay.test".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .expect("gateway should build")
    }

    #[test]
    fn status_map_covers_mobilepay_vocabulary() {
        let g = gateway();
        assert_eq!(g.map_status("initiated"), PaymentStatus::Processing);
        assert_eq!(g.map_status("reserved"), PaymentStatus::Processing);
        assert_eq!(g.map_status("captured"), PaymentStatus::Succeeded);
        assert_eq!(g.map_status("cancelled"), PaymentStatus::Cancelled);
        assert_eq!(g.map_status("expired"), PaymentStatus::Failed);
        assert_eq!(g.map_status("rejected"), PaymentStatus::Failed);
        assert_eq!(g.map_status("new_state"), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn create_intent_rejects_unsupported_currency() {
        let g = gateway();
        let err = g
            .create_intent(IntentRequest {
                amount: BigDecimal::from(100),
                currency: Currency::Sek,
                reference: "pay_1".to_string(),
                description: None,
                payer_phone: None,
                callback_url: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }

    #[test]
    fn parse_webhook_reads_callback_fields() {
        let g = gateway();
        let payload = serde_json::json!({
            "notificationId": "ntf_1",
            "paymentId": "mp_pay_1",
            "state": "captured",
            "amount": 25000
        });
        let event = g
            .parse_webhook(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(event.provider_ref.as_deref(), Some("mp_pay_1"));
        assert_eq!(event.raw_status.as_deref(), Some("captured"));
        assert_eq!(event.amount, Some(BigDecimal::from(250)));
    }
}
