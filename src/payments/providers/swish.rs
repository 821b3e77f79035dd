use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::http::{verify_hmac_sha256_hex, PaymentHttpClient};
use crate::payments::types::{
    Currency, GatewayWebhook, IntentRequest, IntentResponse, PaymentStatus, ProviderName,
    RefundRequest, RefundResponse, StatusResponse, WebhookVerification,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SwishConfig {
    pub api_key: String,
    pub payee_alias: String,
    pub callback_url: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl SwishConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_key = std::env::var("SWISH_API_KEY").map_err(|_| PaymentError::ValidationError {
            message: "SWISH_API_KEY environment variable is required".to_string(),
            field: Some("SWISH_API_KEY".to_string()),
        })?;
        let payee_alias =
            std::env::var("SWISH_PAYEE_ALIAS").map_err(|_| PaymentError::ValidationError {
                message: "SWISH_PAYEE_ALIAS environment variable is required".to_string(),
                field: Some("SWISH_PAYEE_ALIAS".to_string()),
            })?;
        let callback_url =
            std::env::var("SWISH_CALLBACK_URL").map_err(|_| PaymentError::ValidationError {
                message: "SWISH_CALLBACK_URL environment variable is required".to_string(),
                field: Some("SWISH_CALLBACK_URL".to_string()),
            })?;

        Ok(Self {
            base_url: std::env::var("SWISH_BASE_URL")
                .unwrap_or_else(|_| "https://cpc.getswish.net/swish-cpcapi".to_string()),
            webhook_secret: std::env::var("SWISH_WEBHOOK_SECRET").ok(),
            timeout_secs: std::env::var("SWISH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("SWISH_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            api_key,
            payee_alias,
            callback_url,
        })
    }
}

/// Swish payment requests (Sweden, SEK only). The rail is asynchronous:
/// the payer approves in the Swish app and the outcome arrives on the
/// callback URL, so there is no synchronous confirm step.
pub struct SwishGateway {
    config: SwishConfig,
    http: PaymentHttpClient,
}

impl SwishGateway {
    pub fn new(config: SwishConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(SwishConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[async_trait]
impl PaymentGateway for SwishGateway {
    async fn create_intent(&self, request: IntentRequest) -> PaymentResult<IntentResponse> {
        if request.currency != Currency::Sek {
            return Err(PaymentError::ValidationError {
                message: format!("Swish only supports SEK, got {}", request.currency.as_str()),
                field: Some("currency".to_string()),
            });
        }
        let payer_alias = request
            .payer_phone
            .as_deref()
            .ok_or(PaymentError::ValidationError {
                message: "Swish payments require the payer's phone number".to_string(),
                field: Some("payer_phone".to_string()),
            })?;

        // Swish wants the caller to choose the instruction id (32 hex chars)
        let instruction_id = Uuid::new_v4().simple().to_string().to_uppercase();

        let body = serde_json::json!({
            "payeePaymentReference": request.reference,
            "callbackUrl": request
                .callback_url
                .as_deref()
                .unwrap_or(&self.config.callback_url),
            "payerAlias": payer_alias,
            "payeeAlias": self.config.payee_alias,
            "amount": request.amount.to_string(),
            "currency": "SEK",
            "message": request.description.as_deref().unwrap_or(""),
        });

        let _: JsonValue = self
            .http
            .request_json(
                reqwest::Method::PUT,
                &self.endpoint(&format!("/api/v2/paymentrequests/{}", instruction_id)),
                Some(&self.config.api_key),
                Some(&body),
                &[],
            )
            .await?;

        info!(instruction_id = %instruction_id, "swish payment request created");

        Ok(IntentResponse {
            provider: ProviderName::Swish,
            provider_ref: instruction_id,
            status: PaymentStatus::Pending,
            raw_status: "CREATED".to_string(),
            client_secret: None,
            redirect_url: None,
        })
    }

    async fn confirm_intent(
        &self,
        provider_ref: &str,
        _payment_method_ref: Option<&str>,
    ) -> PaymentResult<StatusResponse> {
        // Approval happens in the payer's app; polling is the only follow-up.
        self.fetch_status(provider_ref).await
    }

    async fn create_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let amount = request
            .amount
            .as_ref()
            .ok_or(PaymentError::ValidationError {
                message: "Swish refunds require an explicit amount".to_string(),
                field: Some("amount".to_string()),
            })?;

        let refund_id = Uuid::new_v4().simple().to_string().to_uppercase();
        let body = serde_json::json!({
            "originalPaymentReference": request.provider_ref,
            "callbackUrl": self.config.callback_url,
            "payerAlias": self.config.payee_alias,
            "amount": amount.to_string(),
            "currency": request.currency.as_str(),
            "message": request.reason.as_deref().unwrap_or(""),
        });

        let _: JsonValue = self
            .http
            .request_json(
                reqwest::Method::PUT,
                &self.endpoint(&format!("/api/v2/refunds/{}", refund_id)),
                Some(&self.config.api_key),
                Some(&body),
                &[],
            )
            .await?;

        Ok(RefundResponse {
            provider_refund_ref: refund_id,
            status: PaymentStatus::Processing,
            raw_status: "CREATED".to_string(),
        })
    }

    async fn fetch_status(&self, provider_ref: &str) -> PaymentResult<StatusResponse> {
        let payment: SwishPaymentStatus = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/api/v1/paymentrequests/{}", provider_ref)),
                Some(&self.config.api_key),
                None,
                &[],
            )
            .await?;

        Ok(StatusResponse {
            provider_ref: payment.id,
            status: self.map_status(&payment.status),
            raw_status: payment.status,
            failure_reason: payment.error_message,
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Swish
    }

    fn supported_currencies(&self) -> &'static [Currency] {
        &[Currency::Sek]
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status {
            "CREATED" => PaymentStatus::Processing,
            "PAID" => PaymentStatus::Succeeded,
            "DECLINED" | "ERROR" => PaymentStatus::Failed,
            "CANCELLED" => PaymentStatus::Cancelled,
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
            // Swish callbacks are authenticated by mutual TLS at the edge;
            // without a shared secret there is nothing more to check here.
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

        let raw_status = body
            .get("status")
            .and_then(|v| v.as_str())
            .map(String::from);
        let provider_ref = body.get("id").and_then(|v| v.as_str()).map(String::from);
        let amount = body
            .get("amount")
            .and_then(|v| match v {
                JsonValue::String(s) => s.parse::<bigdecimal::BigDecimal>().ok(),
                JsonValue::Number(n) => n.to_string().parse::<bigdecimal::BigDecimal>().ok(),
                _ => None,
            });
        let failure_reason = body
            .get("errorMessage")
            .and_then(|v| v.as_str())
            .map(String::from)
            .or_else(|| {
                body.get("errorCode")
                    .and_then(|v| v.as_str())
                    .map(String::from)
            });

        Ok(GatewayWebhook {
            provider: ProviderName::Swish,
            event_id: None,
            event_type: "payment.callback".to_string(),
            provider_ref,
            refund_ref: None,
            raw_status,
            amount,
            failure_reason,
            payload: body,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwishPaymentStatus {
    id: String,
    status: String,
    error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn gateway(webhook_secret: Option<&str>) -> SwishGateway {
        SwishGateway::new(SwishConfig {
            api_key: "key".to_string(),
            payee_alias: "1231111111".to_string(),
            callback_url: "https://example.test/webhooks/swish".to_string(),
            webhook_secret: webhook_secret.map(String::from),
            base_url: "https://swish.test".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        })
        .expect("gateway should build")
    }

    #[test]
    fn status_map_covers_swish_vocabulary() {
        let g = gateway(None);
        assert_eq!(g.map_status("CREATED"), PaymentStatus::Processing);
        assert_eq!(g.map_status("PAID"), PaymentStatus::Succeeded);
        assert_eq!(g.map_status("DECLINED"), PaymentStatus::Failed);
        assert_eq!(g.map_status("ERROR"), PaymentStatus::Failed);
        assert_eq!(g.map_status("CANCELLED"), PaymentStatus::Cancelled);
        assert_eq!(g.map_status("SOMETHING_ELSE"), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn create_intent_rejects_non_sek() {
        let g = gateway(None);
        let err = g
            .create_intent(IntentRequest {
                amount: BigDecimal::from(100),
                currency: Currency::Eur,
                reference: "pay_1".to_string(),
                description: None,
                payer_phone: Some("46701234567".to_string()),
                callback_url: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }

    #[tokio::test]
    async fn create_intent_requires_payer_phone() {
        let g = gateway(None);
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
        let g = gateway(None);
        let payload = serde_json::json!({
            "id": "0902D12C7FXX8DA6B9B5727CFF8C5BXX",
            "payeePaymentReference": "pay_1",
            "status": "PAID",
            "amount": "150.00",
            "currency": "SEK"
        });
        let event = g
            .parse_webhook(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(
            event.provider_ref.as_deref(),
            Some("0902D12C7FXX8DA6B9B5727CFF8C5BXX")
        );
        assert_eq!(event.raw_status.as_deref(), Some("PAID"));
        assert_eq!(event.amount, Some(BigDecimal::from(150)));
    }

    #[test]
    fn webhook_verification_uses_secret_when_configured() {
        use crate::payments::http::hmac_sha256_hex;
        let g = gateway(Some("callback-secret"));
        let payload = br#"{"id":"abc","status":"PAID"}"#;
        let signature = hmac_sha256_hex(payload, "callback-secret");

        let ok = g.verify_webhook(payload, &signature).unwrap();
        assert!(ok.valid);

        let bad = g.verify_webhook(payload, "wrong").unwrap();
        assert!(!bad.valid);
    }
}
