//! Webhook verification and parsing against the public adapter surface

use hansa_payments::payments::gateway::PaymentGateway;
use hansa_payments::payments::http::hmac_sha256_hex;
use hansa_payments::payments::providers::stripe::{StripeConfig, StripeGateway};
use hansa_payments::payments::providers::swish::{SwishConfig, SwishGateway};
use hansa_payments::payments::types::ProviderName;

const WEBHOOK_SECRET: &str = "whsec_test_secret";

fn stripe() -> StripeGateway {
    StripeGateway::new(StripeConfig {
        secret_key: "sk_test".into(),
        webhook_secret: WEBHOOK_SECRET.into(),
        ..StripeConfig::default()
    })
    .unwrap()
}

/// Build a Stripe-Signature header the way Stripe does: HMAC-SHA256 over
/// `{timestamp}.{raw body}`.
fn stripe_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);
    format!("t={},v1={}", timestamp, hmac_sha256_hex(&signed, secret))
}

#[test]
fn fresh_stripe_signature_verifies() {
    let g = stripe();
    let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{}}}"#;
    let header = stripe_signature(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp());

    let result = g.verify_webhook(payload, &header).unwrap();
    assert!(result.valid, "reason: {:?}", result.reason);
}

#[test]
fn tampered_body_fails_verification() {
    let g = stripe();
    let payload = br#"{"id":"evt_1","amount":100}"#;
    let header = stripe_signature(payload, WEBHOOK_SECRET, chrono::Utc::now().timestamp());

    let tampered = br#"{"id":"evt_1","amount":999}"#;
    let result = g.verify_webhook(tampered, &header).unwrap();
    assert!(!result.valid);
}

#[test]
fn replayed_signature_outside_tolerance_fails() {
    let g = stripe();
    let payload = br#"{"id":"evt_1"}"#;
    // 10 minutes old, beyond the 5-minute window
    let stale = chrono::Utc::now().timestamp() - 600;
    let header = stripe_signature(payload, WEBHOOK_SECRET, stale);

    let result = g.verify_webhook(payload, &header).unwrap();
    assert!(!result.valid);
}

#[test]
fn signature_with_wrong_secret_fails() {
    let g = stripe();
    let payload = br#"{"id":"evt_1"}"#;
    let header = stripe_signature(payload, "whsec_somebody_else", chrono::Utc::now().timestamp());

    let result = g.verify_webhook(payload, &header).unwrap();
    assert!(!result.valid);
}

#[test]
fn garbage_signature_headers_fail_without_panicking() {
    let g = stripe();
    for header in ["", "t=,v1=", "v1=abc", "t=notanumber,v1=abc", "abc"] {
        let result = g.verify_webhook(b"{}", header).unwrap();
        assert!(!result.valid, "header {:?} should not verify", header);
    }
}

#[test]
fn stripe_intent_events_parse_to_normalized_form() {
    let g = stripe();
    let payload = serde_json::json!({
        "id": "evt_abc",
        "type": "payment_intent.payment_failed",
        "data": {"object": {
            "id": "pi_1",
            "status": "requires_payment_method",
            "amount": 10000,
            "last_payment_error": {"message": "card_declined"}
        }}
    });

    let event = g.parse_webhook(payload.to_string().as_bytes()).unwrap();
    assert_eq!(event.provider, ProviderName::Stripe);
    assert_eq!(event.event_id.as_deref(), Some("evt_abc"));
    assert_eq!(event.event_type, "payment_intent.payment_failed");
    assert_eq!(event.provider_ref.as_deref(), Some("pi_1"));
    assert_eq!(event.failure_reason.as_deref(), Some("card_declined"));
}

#[test]
fn stripe_refund_events_carry_both_references() {
    let g = stripe();
    let payload = serde_json::json!({
        "id": "evt_re",
        "type": "refund.updated",
        "data": {"object": {
            "id": "re_9",
            "payment_intent": "pi_1",
            "status": "succeeded",
            "amount": 2500
        }}
    });

    let event = g.parse_webhook(payload.to_string().as_bytes()).unwrap();
    assert_eq!(event.provider_ref.as_deref(), Some("pi_1"));
    assert_eq!(event.refund_ref.as_deref(), Some("re_9"));
}

#[test]
fn invalid_json_is_a_parse_error_not_a_panic() {
    let g = stripe();
    assert!(g.parse_webhook(b"not json at all").is_err());
    assert!(g.parse_webhook(b"").is_err());
}

#[test]
fn swish_callbacks_verify_against_configured_secret() {
    let g = SwishGateway::new(SwishConfig {
        api_key: "key".into(),
        payee_alias: "1231111111".into(),
        callback_url: "https://example.test/cb".into(),
        webhook_secret: Some("shared".into()),
        base_url: "https://swish.test".into(),
        timeout_secs: 5,
        max_retries: 0,
    })
    .unwrap();

    let payload = br#"{"id":"ABC","status":"PAID"}"#;
    let good = hmac_sha256_hex(payload, "shared");
    assert!(g.verify_webhook(payload, &good).unwrap().valid);
    assert!(!g.verify_webhook(payload, "bogus").unwrap().valid);
}

#[test]
fn swish_without_secret_accepts_with_a_reason() {
    let g = SwishGateway::new(SwishConfig {
        api_key: "key".into(),
        payee_alias: "1231111111".into(),
        callback_url: "https://example.test/cb".into(),
        webhook_secret: None,
        base_url: "https://swish.test".into(),
        timeout_secs: 5,
        max_retries: 0,
    })
    .unwrap();

    let result = g.verify_webhook(b"{}", "").unwrap();
    assert!(result.valid);
    assert!(result.reason.is_some());
}
