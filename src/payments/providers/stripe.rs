use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::http::{hmac_sha256_hex, secure_eq, PaymentHttpClient};
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

/// Maximum age of a Stripe-Signature timestamp before the event is rejected
/// as a possible replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").map_err(|_| PaymentError::ValidationError {
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
                field: Some("STRIPE_SECRET_KEY".to_string()),
            })?;
        let webhook_secret =
            std::env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| PaymentError::ValidationError {
                message: "STRIPE_WEBHOOK_SECRET environment variable is required".to_string(),
                field: Some("STRIPE_WEBHOOK_SECRET".to_string()),
            })?;

        Ok(Self {
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("STRIPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            secret_key,
            webhook_secret,
        })
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    http: PaymentHttpClient,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Stripe amounts are integer minor units; all supported currencies have
    /// two decimal places.
    fn to_minor_units(amount: &BigDecimal) -> PaymentResult<i64> {
        (amount * BigDecimal::from(100))
            .with_scale(0)
            .to_i64()
            .ok_or(PaymentError::ValidationError {
                message: format!("amount out of range: {}", amount),
                field: Some("amount".to_string()),
            })
    }

    fn from_minor_units(amount: i64) -> BigDecimal {
        BigDecimal::from(amount) / BigDecimal::from(100)
    }

    /// Parse a `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`
    fn parse_signature_header(header: &str) -> Option<(i64, Vec<String>)> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let mut kv = part.trim().splitn(2, '=');
            match (kv.next(), kv.next()) {
                (Some("t"), Some(v)) => timestamp = v.parse::<i64>().ok(),
                (Some("v1"), Some(v)) => signatures.push(v.to_string()),
                _ => {}
            }
        }
        match (timestamp, signatures.is_empty()) {
            (Some(ts), false) => Some((ts, signatures)),
            _ => None,
        }
    }

    /// Stripe refunds can settle asynchronously: a `pending` refund is
    /// recorded but not final until a `refund.updated` event promotes it.
    fn map_refund_status(raw: &str) -> PaymentStatus {
        match raw {
            "succeeded" => PaymentStatus::Refunded,
            "pending" => PaymentStatus::Processing,
            "canceled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Failed,
        }
    }

    fn verify_signature(&self, payload: &[u8], header: &str, now_unix: i64) -> bool {
        let (timestamp, signatures) = match Self::parse_signature_header(header) {
            Some(parsed) => parsed,
            None => return false,
        };

        if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return false;
        }

        // Signed payload is "{timestamp}.{raw body}"
        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        let expected = hmac_sha256_hex(&signed, &self.config.webhook_secret);

        signatures
            .iter()
            .any(|sig| secure_eq(expected.as_bytes(), sig.as_bytes()))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(&self, request: IntentRequest) -> PaymentResult<IntentResponse> {
        let amount_minor = Self::to_minor_units(&request.amount)?;

        let mut params: Vec<(&str, String)> = vec![
            ("amount", amount_minor.to_string()),
            ("currency", request.currency.as_str().to_lowercase()),
            ("metadata[reference]", request.reference.clone()),
        ];
        if let Some(description) = &request.description {
            params.push(("description", description.clone()));
        }

        let intent: StripePaymentIntent = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment_intents"),
                Some(&self.config.secret_key),
                &params,
                &[],
            )
            .await?;

        info!(intent_id = %intent.id, "stripe payment intent created");

        Ok(IntentResponse {
            provider: ProviderName::Stripe,
            status: self.map_status(&intent.status),
            raw_status: intent.status,
            provider_ref: intent.id,
            client_secret: intent.client_secret,
            redirect_url: None,
        })
    }

    async fn confirm_intent(
        &self,
        provider_ref: &str,
        payment_method_ref: Option<&str>,
    ) -> PaymentResult<StatusResponse> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(pm) = payment_method_ref {
            params.push(("payment_method", pm.to_string()));
        }

        let intent: StripePaymentIntent = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/payment_intents/{}/confirm", provider_ref)),
                Some(&self.config.secret_key),
                &params,
                &[],
            )
            .await?;

        Ok(StatusResponse {
            provider_ref: intent.id,
            status: self.map_status(&intent.status),
            raw_status: intent.status,
            failure_reason: intent.last_payment_error.and_then(|e| e.message),
        })
    }

    async fn create_refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let mut params: Vec<(&str, String)> =
            vec![("payment_intent", request.provider_ref.clone())];
        if let Some(amount) = &request.amount {
            params.push(("amount", Self::to_minor_units(amount)?.to_string()));
        }
        if let Some(reason) = &request.reason {
            params.push(("metadata[reason]", reason.clone()));
        }

        let refund: StripeRefund = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                Some(&self.config.secret_key),
                &params,
                &[],
            )
            .await?;

        info!(refund_id = %refund.id, "stripe refund created");

        Ok(RefundResponse {
            provider_refund_ref: refund.id,
            status: Self::map_refund_status(&refund.status),
            raw_status: refund.status,
        })
    }

    async fn fetch_status(&self, provider_ref: &str) -> PaymentResult<StatusResponse> {
        let intent: StripePaymentIntent = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{}", provider_ref)),
                Some(&self.config.secret_key),
                None,
                &[],
            )
            .await?;

        Ok(StatusResponse {
            provider_ref: intent.id,
            status: self.map_status(&intent.status),
            raw_status: intent.status,
            failure_reason: intent.last_payment_error.and_then(|e| e.message),
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Stripe
    }

    fn supported_currencies(&self) -> &'static [Currency] {
        &[
            Currency::Sek,
            Currency::Nok,
            Currency::Dkk,
            Currency::Eur,
            Currency::Usd,
            Currency::Gbp,
        ]
    }

    fn map_status(&self, provider_status: &str) -> PaymentStatus {
        match provider_status {
            "requires_payment_method" => PaymentStatus::Pending,
            "requires_confirmation" => PaymentStatus::RequiresConfirmation,
            "requires_action" => PaymentStatus::RequiresAction,
            "processing" | "requires_capture" => PaymentStatus::Processing,
            "succeeded" => PaymentStatus::Succeeded,
            "canceled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Failed,
        }
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerification> {
        let valid = self.verify_signature(payload, signature, chrono::Utc::now().timestamp());
        Ok(WebhookVerification {
            valid,
            reason: if valid {
                None
            } else {
                Some("signature mismatch or timestamp outside tolerance".to_string())
            },
        })
    }

    fn parse_webhook(&self, payload: &[u8]) -> PaymentResult<GatewayWebhook> {
        let body: JsonValue =
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid webhook JSON: {}", e),
                field: Some("payload".to_string()),
            })?;

        let event_id = body.get("id").and_then(|v| v.as_str()).map(String::from);
        let event_type = body
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let object = body
            .get("data")
            .and_then(|d| d.get("object"))
            .cloned()
            .unwrap_or(JsonValue::Null);

        let raw_status = object
            .get("status")
            .and_then(|v| v.as_str())
            .map(String::from);
        let amount = object
            .get("amount")
            .and_then(|v| v.as_i64())
            .map(Self::from_minor_units);
        let failure_reason = object
            .get("last_payment_error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .map(String::from);

        // Refund events carry the refund object; the intent id sits in its
        // payment_intent field.
        let (provider_ref, refund_ref) = if event_type.starts_with("refund.")
            || event_type.starts_with("charge.refund")
        {
            (
                object
                    .get("payment_intent")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                object.get("id").and_then(|v| v.as_str()).map(String::from),
            )
        } else {
            (
                object.get("id").and_then(|v| v.as_str()).map(String::from),
                None,
            )
        };

        Ok(GatewayWebhook {
            provider: ProviderName::Stripe,
            event_id,
            event_type,
            provider_ref,
            refund_ref,
            raw_status,
            amount,
            failure_reason,
            payload: body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    client_secret: Option<String>,
    last_payment_error: Option<StripePaymentError>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test_x".to_string(),
            webhook_secret: "whsec_test".to_string(),
            ..StripeConfig::default()
        })
        .expect("gateway should build")
    }

    fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(payload);
        format!("t={},v1={}", timestamp, hmac_sha256_hex(&signed, secret))
    }

    #[test]
    fn status_map_covers_the_intent_lifecycle() {
        let g = gateway();
        assert_eq!(g.map_status("requires_payment_method"), PaymentStatus::Pending);
        assert_eq!(
            g.map_status("requires_confirmation"),
            PaymentStatus::RequiresConfirmation
        );
        assert_eq!(g.map_status("requires_action"), PaymentStatus::RequiresAction);
        assert_eq!(g.map_status("processing"), PaymentStatus::Processing);
        assert_eq!(g.map_status("succeeded"), PaymentStatus::Succeeded);
        assert_eq!(g.map_status("canceled"), PaymentStatus::Cancelled);
    }

    #[test]
    fn pending_refunds_are_not_reported_as_final() {
        assert_eq!(
            StripeGateway::map_refund_status("pending"),
            PaymentStatus::Processing
        );
        assert_eq!(
            StripeGateway::map_refund_status("succeeded"),
            PaymentStatus::Refunded
        );
        assert_eq!(
            StripeGateway::map_refund_status("canceled"),
            PaymentStatus::Cancelled
        );
        assert_eq!(
            StripeGateway::map_refund_status("requires_action"),
            PaymentStatus::Failed
        );
    }

    #[test]
    fn unknown_statuses_fail_closed() {
        let g = gateway();
        assert_eq!(g.map_status("definitely_new_state"), PaymentStatus::Failed);
        assert_eq!(g.map_status(""), PaymentStatus::Failed);
    }

    #[test]
    fn valid_signature_within_tolerance_verifies() {
        let g = gateway();
        let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, "whsec_test", now);
        assert!(g.verify_signature(payload, &header, now + 10));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let g = gateway();
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, "whsec_test", now);
        assert!(!g.verify_signature(payload, &header, now + SIGNATURE_TOLERANCE_SECS + 1));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let g = gateway();
        let payload = br#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, "whsec_other", now);
        assert!(!g.verify_signature(payload, &header, now));
    }

    #[test]
    fn malformed_signature_header_is_rejected() {
        let g = gateway();
        assert!(!g.verify_signature(b"{}", "nonsense", 1_700_000_000));
        assert!(!g.verify_signature(b"{}", "t=abc,v1=", 1_700_000_000));
        assert!(!g.verify_signature(b"{}", "v1=deadbeef", 1_700_000_000));
    }

    #[test]
    fn parse_webhook_extracts_intent_fields() {
        let g = gateway();
        let payload = serde_json::json!({
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_456", "status": "succeeded", "amount": 150000}}
        });
        let event = g
            .parse_webhook(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(event.event_id.as_deref(), Some("evt_123"));
        assert_eq!(event.provider_ref.as_deref(), Some("pi_456"));
        assert_eq!(event.refund_ref, None);
        assert_eq!(event.raw_status.as_deref(), Some("succeeded"));
        assert_eq!(event.amount, Some(BigDecimal::from(1500)));
    }

    #[test]
    fn parse_webhook_extracts_refund_fields() {
        let g = gateway();
        let payload = serde_json::json!({
            "id": "evt_999",
            "type": "refund.updated",
            "data": {"object": {
                "id": "re_1",
                "payment_intent": "pi_456",
                "status": "succeeded",
                "amount": 50000
            }}
        });
        let event = g
            .parse_webhook(payload.to_string().as_bytes())
            .expect("parse should succeed");
        assert_eq!(event.provider_ref.as_deref(), Some("pi_456"));
        assert_eq!(event.refund_ref.as_deref(), Some("re_1"));
        assert_eq!(event.amount, Some(BigDecimal::from(500)));
    }

    #[test]
    fn minor_unit_conversion_is_exact() {
        use std::str::FromStr;
        let amount = BigDecimal::from_str("1234.56").unwrap();
        assert_eq!(StripeGateway::to_minor_units(&amount).unwrap(), 123456);
        assert_eq!(
            StripeGateway::from_minor_units(123456),
            BigDecimal::from_str("1234.56").unwrap()
        );
    }
}
