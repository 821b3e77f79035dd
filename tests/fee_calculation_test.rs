//! Fee schedule behavior across methods and currencies

use bigdecimal::BigDecimal;
use hansa_payments::payments::types::{Currency, PaymentMethod};
use hansa_payments::services::escrow_service::calculate_escrow_fees;
use hansa_payments::services::payment_orchestrator::calculate_payment_fees;
use std::str::FromStr;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

#[test]
fn card_fees_per_currency() {
    let sek = calculate_payment_fees(&dec("1000"), PaymentMethod::Card, Currency::Sek);
    assert_eq!(sek.fee_amount, dec("30.80"));
    assert_eq!(sek.total_amount, dec("1030.80"));

    let eur = calculate_payment_fees(&dec("1000"), PaymentMethod::Card, Currency::Eur);
    assert_eq!(eur.fee_amount, dec("29.25"));

    let usd = calculate_payment_fees(&dec("1000"), PaymentMethod::Card, Currency::Usd);
    assert_eq!(usd.fee_amount, dec("29.30"));

    let gbp = calculate_payment_fees(&dec("1000"), PaymentMethod::Card, Currency::Gbp);
    assert_eq!(gbp.fee_amount, dec("29.20"));
}

#[test]
fn sepa_is_cheaper_than_card() {
    let sepa = calculate_payment_fees(&dec("1000"), PaymentMethod::Sepa, Currency::Eur);
    let card = calculate_payment_fees(&dec("1000"), PaymentMethod::Card, Currency::Eur);
    assert_eq!(sepa.fee_amount, dec("8.25"));
    assert!(sepa.fee_amount < card.fee_amount);
}

#[test]
fn wallet_fee_schedules() {
    assert_eq!(
        calculate_payment_fees(&dec("1000"), PaymentMethod::Swish, Currency::Sek).fee_amount,
        dec("13.00")
    );
    assert_eq!(
        calculate_payment_fees(&dec("1000"), PaymentMethod::MobilePay, Currency::Dkk).fee_amount,
        dec("14.50")
    );
    assert_eq!(
        calculate_payment_fees(&dec("1000"), PaymentMethod::Vipps, Currency::Nok).fee_amount,
        dec("15.00")
    );
}

#[test]
fn fee_totals_are_base_plus_fee() {
    let fees = calculate_payment_fees(&dec("249.99"), PaymentMethod::MobilePay, Currency::Eur);
    assert_eq!(fees.base_amount, dec("249.99"));
    assert_eq!(&fees.base_amount + &fees.fee_amount, fees.total_amount);
}

#[test]
fn rounding_is_half_up_to_two_decimals() {
    // 0.125% cases: 123.45 * 2.9% = 3.58005 -> 3.58 (+ 1.80 fixed)
    let fees = calculate_payment_fees(&dec("123.45"), PaymentMethod::Card, Currency::Sek);
    assert_eq!(fees.fee_amount, dec("5.38"));

    // 33.35 * 1.45% = 0.483575 -> 0.48
    let fees = calculate_payment_fees(&dec("33.35"), PaymentMethod::MobilePay, Currency::Dkk);
    assert_eq!(fees.fee_amount, dec("0.48"));
}

#[test]
fn escrow_fee_is_fifty_basis_points() {
    let fees = calculate_escrow_fees(&dec("20000"), Currency::Sek);
    assert_eq!(fees.fee_amount, dec("100.00"));
    assert_eq!(fees.total_amount, dec("20100.00"));
}

#[test]
fn escrow_fee_floors_per_currency() {
    assert_eq!(calculate_escrow_fees(&dec("50"), Currency::Sek).fee_amount, dec("10.00"));
    assert_eq!(calculate_escrow_fees(&dec("50"), Currency::Nok).fee_amount, dec("10.00"));
    assert_eq!(calculate_escrow_fees(&dec("50"), Currency::Dkk).fee_amount, dec("10.00"));
    assert_eq!(calculate_escrow_fees(&dec("50"), Currency::Eur).fee_amount, dec("5.00"));
    assert_eq!(calculate_escrow_fees(&dec("50"), Currency::Usd).fee_amount, dec("5.00"));
    assert_eq!(calculate_escrow_fees(&dec("50"), Currency::Gbp).fee_amount, dec("4.00"));
}

#[test]
fn escrow_fee_crosses_the_floor_smoothly() {
    // 2000 * 0.5% = 10.00, exactly the SEK floor
    assert_eq!(
        calculate_escrow_fees(&dec("2000"), Currency::Sek).fee_amount,
        dec("10.00")
    );
    // just above: percentage wins
    assert_eq!(
        calculate_escrow_fees(&dec("2002"), Currency::Sek).fee_amount,
        dec("10.01")
    );
}
