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
pub struct VippsConfig {
    pub access_token: String,
    pub subscription_key: String,
    pub merchant_serial_number: String,
    pub callback_url: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl VippsConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let access_token =
            std::env::var("VIPPS_ACCESS_TOKEN").map_err(|_| PaymentError::ValidationError {
                message: "VIPPS_ACCESS_TOKEN environment variable is required".to_string(),
                field: Some("VIPPS_ACCESS_TOKEN".to_string()),
            })?;
        let subscription_key =
            std::env::var("VIPPS_SUBSCRIPTION_KEY").map_err(|_| PaymentError::ValidationError {
                message: "VIPPS_SUBSCRIPTION_KEY environment variable is required".to_string(),
                field: Some("VIPPS_SUBSCRIPTION_KEY".to_string()),
            })?;
        let merchant_serial_number = std::env::var("VIPPS_MERCHANT_SERIAL_NUMBER").map_err(|_| {
            PaymentError::ValidationError {
                message: "VIPPS_MERCHANT_SERIAL_NUMBER environment variable is required"
                    .to_string(),
                field: Some("VIPPS_MERCHANT_SERIAL_NUMBER".to_string()),
            }
        })?;
        let callback_url =
            std::env::var("VIPPS_CALLBACK_URL").map_err(|_| PaymentError::ValidationError {
                message: "VIPPS_CALLBACK_URL environment variable is required".to_string(),
                field: Some("VIPPS_CALLBACK_URL".to_string()),
            })?;

        Ok(Self {
            base_url: std::env::var("VIPPS_BASE_URL")
                .unwrap_or_else(|_| "https://api.vipps.no".to_string()),
            webhook_secret: std::env::var("VIPPS_WEBHOOK_SECRET").ok(),
            timeout_secs: std::env::var("VIPPS_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("VIPPS_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            access_token,
            subscription_key,
            merchant_serial_number,
            callback_url,
        })
    }
}

/// Vipps ePayment (Norway, NOK only). Amounts are integer minor units
/// (øre); the reference we choose doubles as the provider ref.
pub struct VippsGateway {
    config: VippsConfig,
    http: PaymentHttpClient,
}

impl VippsGateway {
    pub fn new(config: VippsConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(VippsConfig::from_env()?)
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
impl PaymentGateway for VippsGateway {
    async fn create_intent(&self, request: IntentRequest) -> PaymentResult<IntentResponse> {
        if request.currency != Currency::Nok {
            return Err(PaymentError::ValidationError {
                message: format!("Vipps only supports NOK, got {}", request.currency.as_str()),
                field: Some("currency".to_string()),
            });
        }

        let reference = format!("hansa-{}", Uuid::new_v4().simple());
        let body = serde_json::json!({
            "amount": {
                "value": Self::to_minor_units(&request.amount)?,
                "currency": "NOK"
            },
            "paymentMethod": { "type": "WALLET" },
            "reference": reference,
            "returnUrl": request.callback_url.as_deref().unwrap_or(&self.config.callback_url),
            "userFlow": "WEB_REDIRECT",
            "paymentDescription": request.description.as_deref().unwrap_or(&request.reference),
        });

        let created: VippsCreateResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/epayment/v1/payments"),
                Some(&self.config.access_token),
                Some(&body),
                &[
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                    (
                        "Merchant-Serial-Number",
                        self.config.merchant_serial_number.as_str(),
                    ),
                    ("Idempotency-Key", reference.as_str()),
                ],
            )
            .await?;

        info!(reference = %created.reference, "vipps payment created");

        Ok(IntentResponse {
            provider: ProviderName::Vipps,
            provider_ref: created.reference,
            status: PaymentStatus::Pending,
            raw_status: "INITIATE".to_string(),
            client_secret: None,
            redirect_url: created.redirect_url,
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
                message: "Vipps refunds require an explicit amount".to_string(),
                field: Some("amount".to_string()),
            })?;

        let idempotency_key = Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "modificationAmount": {
                "value": Self::to_minor_units(amount)?,
                "currency": "NOK"
            }
        });

        let _: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/epayment/v1/payments/{}/refund", request.provider_ref)),
                Some(&self.config.access_token),
                Some(&body),
                &[
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                    (
                        "Merchant-Serial-Number",
                        self.config.merchant_serial_number.as_str(),
                    ),
                    ("Idempotency-Key", idempotency_key.as_str()),
                ],
            )
            .await?;

        Ok(RefundResponse {
            provider_refund_ref: idempotency_key,
            status: PaymentStatus::Processing,
            raw_status: "REFUND".to_string(),
        })
    }

    async fn fetch_status(&self, provider_ref: &str) -> PaymentResult<StatusResponse> {
        let payment: VippsPayment = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/epayment/v1/payments/{}", provider_ref)),
                Some(&self.config.access_token),
                None,
                &[
                    ("Ocp-Apim-Subscription-Key", self.config.subscription_key.as_str()),
                    (
                        "Merchant-Serial-Number",
                        self.config.merchant_serial_number.as_str(),
                    ),
                ],
            )
            .await?;

        Ok(StatusResponse {
            provider_ref: payment.reference,
            status: self.map_status(&payment.state),
            raw_status: payment.state,
            failure_reason: None,
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Vipps
    }

    fn supported_currencies(&self) -> &'static [Currency] {
        &[Currency::Nok]
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status {
            "INITIATE" => PaymentStatus::Pending,
            "RESERVE" | "RESERVED" => PaymentStatus::Processing,
            "CAPTURE" | "CAPTURED" | "SALE" => PaymentStatus::Succeeded,
            "CANCEL" | "CANCELLED" | "VOID" => PaymentStatus::Cancelled,
            "REFUND" => PaymentStatus::Refunded,
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
            .get("reference")
            .and_then(|v| v.as_str())
            .map(String::from);
        let raw_status = body
            .get("name")
            .and_then(|v| v.as_str())
            .map(String::from);
        let amount = body
            .get("amount")
            .and_then(|a| a.get("value"))
            .and_then(|v| v.as_i64())
            .map(|minor| BigDecimal::from(minor) / BigDecimal::from(100));

        Ok(GatewayWebhook {
            provider: ProviderName::Vipps,
            event_id: body
                .get("pspReference")
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
struct VippsCreateResponse {
    reference: String,
    redirect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VippsPayment {
    reference: String,
    state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> VippsGateway {
        VippsGateway::new(VippsConfig {
            access_token: "token".to_string(),
            subscription_key: "sub".to_string(),
            merchant_serial_number: "123456".to_string(),
            callback_url: "https://example.test/webhooks/vipps".to_string(),
            webhook_secret: None,
            base_url: "https://vipps.test".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .expect("gateway should build")
    }

    #[test]
    fn status_map_covers_vipps_vocabulary() {
        let g = gateway();
        assert_eq!(g.map_status("INITIATE"), PaymentStatus::Pending);
        assert_eq!(g.map_status("RESERVE"), PaymentStatus::Processing);
        assert_eq!(g.map_status("RESERVED"), PaymentStatus::Processing);
        assert_eq!(g.map_status("CAPTURE"), PaymentStatus::Succeeded);
        assert_eq!(g.map_status("CAPTURED"), PaymentStatus::Succeeded);
        assert_eq!(g.map_status("SALE"), PaymentStatus::Succeeded);
        assert_eq!(g.map_status("CANCEL"), PaymentStatus::Cancelled);
        assert_eq!(g.map_status("VOID"), PaymentStatus::Cancelled);
        assert_eq!(g.map_status("REFUND"), PaymentStatus::Refunded);
        assert_eq!(g.map_status("UNEXPECTED"), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn create_intent_rejects_non_nok() {
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
            "pspReference": "psp_1",
            "reference": "hansa-abc123",
            "name": "CAPTURED",
            "amount": {"value": 99900, "currency": "NOK"}
        });
        let event = g
            .parse_webhook(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(event.provider_ref.as_deref(), Some("hansa-abc123"));
        assert_eq!(event.raw_status.as_deref(), Some("CAPTURED"));
        assert_eq!(event.amount, Some(BigDecimal::from(999)));
    }
}
