//! Provider status vocabulary translation
//!
//! Every adapter's `map_status` must be total over its provider's
//! vocabulary and fail closed on anything it doesn't recognise.

use hansa_payments::payments::gateway::PaymentGateway;
use hansa_payments::payments::providers::mobilepay::{MobilePayConfig, MobilePayGateway};
use hansa_payments::payments::providers::stripe::{StripeConfig, StripeGateway};
use hansa_payments::payments::providers::swish::{SwishConfig, SwishGateway};
use hansa_payments::payments::providers::vipps::{VippsConfig, VippsGateway};
use hansa_payments::payments::types::PaymentStatus;

fn stripe() -> StripeGateway {
    StripeGateway::new(StripeConfig {
        secret_key: "sk_test".into(),
        webhook_secret: "whsec_test".into(),
        ..StripeConfig::default()
    })
    .unwrap()
}

fn swish() -> SwishGateway {
    SwishGateway::new(SwishConfig {
        api_key: "key".into(),
        payee_alias: "1231111111".into(),
        callback_url: "https://example.test/cb".into(),
        webhook_secret: None,
        base_url: "https://swish.test".into(),
        timeout_secs: 5,
        max_retries: 0,
    })
    .unwrap()
}

fn mobilepay() -> MobilePayGateway {
    MobilePayGateway::new(MobilePayConfig {
        api_key: "key".into(),
        merchant_id: "pp".into(),
        callback_url: "https://example.test/cb".into(),
        webhook_secret: None,
        base_url: "https://mobilepay.test".into(),
        timeout_secs: 5,
        max_retries: 0,
    })
    .unwrap()
}

fn vipps() -> VippsGateway {
    VippsGateway::new(VippsConfig {
        access_token: "token".into(),
        subscription_key: "sub".into(),
        merchant_serial_number: "123456".into(),
        callback_url: "https://example.test/cb".into(),
        webhook_secret: None,
        base_url: "https://vipps.test".into(),
        timeout_secs: 5,
        max_retries: 0,
    })
    .unwrap()
}

#[test]
fn stripe_vocabulary() {
    let g = stripe();
    let cases = [
        ("requires_payment_method", PaymentStatus::Pending),
        ("requires_confirmation", PaymentStatus::RequiresConfirmation),
        ("requires_action", PaymentStatus::RequiresAction),
        ("processing", PaymentStatus::Processing),
        ("requires_capture", PaymentStatus::Processing),
        ("succeeded", PaymentStatus::Succeeded),
        ("canceled", PaymentStatus::Cancelled),
    ];
    for (raw, expected) in cases {
        assert_eq!(g.map_status(raw), expected, "stripe status {}", raw);
    }
}

#[test]
fn swish_vocabulary() {
    let g = swish();
    let cases = [
        ("CREATED", PaymentStatus::Processing),
        ("PAID", PaymentStatus::Succeeded),
        ("DECLINED", PaymentStatus::Failed),
        ("ERROR", PaymentStatus::Failed),
        ("CANCELLED", PaymentStatus::Cancelled),
    ];
    for (raw, expected) in cases {
        assert_eq!(g.map_status(raw), expected, "swish status {}", raw);
    }
}

#[test]
fn mobilepay_vocabulary() {
    let g = mobilepay();
    let cases = [
        ("initiated", PaymentStatus::Processing),
        ("reserved", PaymentStatus::Processing),
        ("captured", PaymentStatus::Succeeded),
        ("cancelled", PaymentStatus::Cancelled),
        ("expired", PaymentStatus::Failed),
        ("rejected", PaymentStatus::Failed),
    ];
    for (raw, expected) in cases {
        assert_eq!(g.map_status(raw), expected, "mobilepay status {}", raw);
    }
}

#[test]
fn vipps_vocabulary() {
    let g = vipps();
    let cases = [
        ("INITIATE", PaymentStatus::Pending),
        ("RESERVE", PaymentStatus::Processing),
        ("RESERVED", PaymentStatus::Processing),
        ("CAPTURE", PaymentStatus::Succeeded),
        ("CAPTURED", PaymentStatus::Succeeded),
        ("SALE", PaymentStatus::Succeeded),
        ("CANCEL", PaymentStatus::Cancelled),
        ("CANCELLED", PaymentStatus::Cancelled),
        ("VOID", PaymentStatus::Cancelled),
        ("REFUND", PaymentStatus::Refunded),
    ];
    for (raw, expected) in cases {
        assert_eq!(g.map_status(raw), expected, "vipps status {}", raw);
    }
}

#[test]
fn unknown_statuses_fail_closed_everywhere() {
    for raw in ["", "garbage", "PAID ", "Succeeded?", "new_provider_state"] {
        assert_eq!(stripe().map_status(raw), PaymentStatus::Failed);
        assert_eq!(swish().map_status(raw), PaymentStatus::Failed);
        assert_eq!(mobilepay().map_status(raw), PaymentStatus::Failed);
        assert_eq!(vipps().map_status(raw), PaymentStatus::Failed);
    }
}
