use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Stripe,
    Swish,
    MobilePay,
    Vipps,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Stripe => "stripe",
            ProviderName::Swish => "swish",
            ProviderName::MobilePay => "mobilepay",
            ProviderName::Vipps => "vipps",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "stripe" => Ok(ProviderName::Stripe),
            "swish" => Ok(ProviderName::Swish),
            "mobilepay" | "mobile_pay" => Ok(ProviderName::MobilePay),
            "vipps" => Ok(ProviderName::Vipps),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Settlement currencies accepted by the marketplace
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Sek,
    Nok,
    Dkk,
    Eur,
    Usd,
    Gbp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Sek => "SEK",
            Currency::Nok => "NOK",
            Currency::Dkk => "DKK",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_uppercase().as_str() {
            "SEK" => Ok(Currency::Sek),
            "NOK" => Ok(Currency::Nok),
            "DKK" => Ok(Currency::Dkk),
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "GBP" => Ok(Currency::Gbp),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported currency: {}", value),
                field: Some("currency".to_string()),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Sepa,
    Swish,
    MobilePay,
    Vipps,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Sepa => "sepa",
            PaymentMethod::Swish => "swish",
            PaymentMethod::MobilePay => "mobile_pay",
            PaymentMethod::Vipps => "vipps",
        }
    }

    /// True for the Nordic wallet methods that settle asynchronously via
    /// callback rather than a synchronous confirm call.
    pub fn is_wallet(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Swish | PaymentMethod::MobilePay | PaymentMethod::Vipps
        )
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "sepa" | "sepa_debit" => Ok(PaymentMethod::Sepa),
            "swish" => Ok(PaymentMethod::Swish),
            "mobile_pay" | "mobilepay" => Ok(PaymentMethod::MobilePay),
            "vipps" => Ok(PaymentMethod::Vipps),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment method: {}", value),
                field: Some("payment_method".to_string()),
            }),
        }
    }
}

/// Payment lifecycle states.
///
/// Webhooks can arrive out of order and more than once, so the state machine
/// is the arbiter: a transition is legal only if listed in
/// `valid_transitions`, and `rank` gives the monotonic order used to reject
/// regressions (a payment never moves backwards).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Succeeded,
    Failed,
    Cancelled,
    PartiallyRefunded,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::RequiresConfirmation => "requires_confirmation",
            PaymentStatus::RequiresAction => "requires_action",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// States reachable from this one
    pub fn valid_transitions(&self) -> &'static [PaymentStatus] {
        use PaymentStatus::*;
        match self {
            Pending => &[
                RequiresConfirmation,
                RequiresAction,
                Processing,
                Succeeded,
                Failed,
                Cancelled,
            ],
            RequiresConfirmation => &[RequiresAction, Processing, Succeeded, Failed, Cancelled],
            RequiresAction => &[Processing, Succeeded, Failed, Cancelled],
            Processing => &[Succeeded, Failed, Cancelled],
            Succeeded => &[PartiallyRefunded, Refunded],
            PartiallyRefunded => &[Refunded],
            Failed | Cancelled | Refunded => &[],
        }
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Terminal for the charge lifecycle. Succeeded is terminal here because
    /// only the refund path (a separate transition family) can follow it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded
                | PaymentStatus::Failed
                | PaymentStatus::Cancelled
                | PaymentStatus::Refunded
        )
    }

    /// Monotonic progress order; a webhook reporting a lower rank than the
    /// stored status is stale and must not be applied.
    pub fn rank(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::RequiresConfirmation => 1,
            PaymentStatus::RequiresAction => 2,
            PaymentStatus::Processing => 3,
            PaymentStatus::Succeeded | PaymentStatus::Failed | PaymentStatus::Cancelled => 4,
            PaymentStatus::PartiallyRefunded => 5,
            PaymentStatus::Refunded => 6,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "requires_confirmation" => Ok(PaymentStatus::RequiresConfirmation),
            "requires_action" => Ok(PaymentStatus::RequiresAction),
            "processing" => Ok(PaymentStatus::Processing),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            "partially_refunded" => Ok(PaymentStatus::PartiallyRefunded),
            "refunded" => Ok(PaymentStatus::Refunded),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown payment status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

/// Escrow account lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Created,
    Funded,
    PartialRelease,
    Released,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Created => "created",
            EscrowStatus::Funded => "funded",
            EscrowStatus::PartialRelease => "partial_release",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }

    pub fn valid_transitions(&self) -> &'static [EscrowStatus] {
        use EscrowStatus::*;
        match self {
            Created => &[Funded],
            Funded => &[PartialRelease, Released, Refunded],
            PartialRelease => &[PartialRelease, Released, Refunded],
            Released | Refunded => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "created" => Ok(EscrowStatus::Created),
            "funded" => Ok(EscrowStatus::Funded),
            "partial_release" => Ok(EscrowStatus::PartialRelease),
            "released" => Ok(EscrowStatus::Released),
            "refunded" => Ok(EscrowStatus::Refunded),
            _ => Err(PaymentError::ValidationError {
                message: format!("unknown escrow status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway request/response structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRequest {
    pub amount: BigDecimal,
    pub currency: Currency,
    pub reference: String,
    pub description: Option<String>,
    pub payer_phone: Option<String>,
    pub callback_url: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResponse {
    pub provider: ProviderName,
    pub provider_ref: String,
    pub status: PaymentStatus,
    pub raw_status: String,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub provider_ref: String,
    pub amount: Option<BigDecimal>,
    pub currency: Currency,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub provider_refund_ref: String,
    pub status: PaymentStatus,
    pub raw_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub provider_ref: String,
    pub status: PaymentStatus,
    pub raw_status: String,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

/// Normalized webhook event produced by a gateway's `parse_webhook`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayWebhook {
    pub provider: ProviderName,
    pub event_id: Option<String>,
    pub event_type: String,
    pub provider_ref: Option<String>,
    /// Set on refund events: the provider's refund object id
    pub refund_ref: Option<String>,
    pub raw_status: Option<String>,
    pub amount: Option<BigDecimal>,
    pub failure_reason: Option<String>,
    pub payload: JsonValue,
}
