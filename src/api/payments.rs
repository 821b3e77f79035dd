use crate::api::escrow::actor_from_headers;
use crate::api::AppState;
use crate::database::payment_repository::{Payment, PaymentRefund};
use crate::error::{AppError, AppResult, ValidationError};
use crate::payments::types::{Currency, PaymentMethod};
use crate::services::payment_orchestrator::{
    calculate_payment_fees, CreatePaymentRequest, FeeBreakdown,
};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub transaction_id: Uuid,
    pub payment_method: String,
    pub payer_phone: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentBody {
    pub payment_method_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundPaymentBody {
    pub amount: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub amount: String,
    pub payment_method: String,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub amount: String,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    pub provider: Option<String>,
    pub provider_ref: Option<String>,
    pub client_secret: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            transaction_id: p.transaction_id,
            amount: p.amount.to_string(),
            currency: p.currency,
            payment_method: p.payment_method,
            status: p.status,
            provider: p.provider,
            provider_ref: p.provider_ref,
            client_secret: p.client_secret,
            failure_reason: p.failure_reason,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: String,
    pub currency: String,
    pub status: String,
    pub reason: Option<String>,
    pub provider_refund_ref: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PaymentRefund> for RefundResponse {
    fn from(r: PaymentRefund) -> Self {
        Self {
            id: r.id,
            payment_id: r.payment_id,
            amount: r.amount.to_string(),
            currency: r.currency,
            status: r.status,
            reason: r.reason,
            provider_refund_ref: r.provider_refund_ref,
            created_at: r.created_at,
        }
    }
}

/// Caller identity from the gateway-injected headers. Authentication itself
/// happens upstream of this service.
pub fn caller_id(headers: &HeaderMap) -> AppResult<Uuid> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::validation(ValidationError::MissingField {
                field: "X-User-Id".to_string(),
            })
        })?;
    Uuid::parse_str(raw).map_err(|_| {
        AppError::validation(ValidationError::MissingField {
            field: "X-User-Id".to_string(),
        })
    })
}

pub fn is_admin(headers: &HeaderMap) -> bool {
    headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .map(|role| role.eq_ignore_ascii_case("admin"))
        .unwrap_or(false)
}

fn envelope<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "data": data }))
}

pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePaymentBody>,
) -> AppResult<Json<serde_json::Value>> {
    let caller = caller_id(&headers)?;
    let method = PaymentMethod::from_str(&body.payment_method).map_err(AppError::from)?;

    let payment = state
        .orchestrator
        .create_payment(
            caller,
            CreatePaymentRequest {
                transaction_id: body.transaction_id,
                payment_method: method,
                payer_phone: body.payer_phone,
                metadata: body.metadata,
            },
        )
        .await?;

    Ok(envelope(PaymentResponse::from(payment)))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let payment = state.orchestrator.get_payment(id).await?;
    Ok(envelope(PaymentResponse::from(payment)))
}

pub async fn process_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<ProcessPaymentBody>,
) -> AppResult<Json<serde_json::Value>> {
    let actor = actor_from_headers(&headers)?;
    let payment = state
        .orchestrator
        .process_payment(actor, id, body.payment_method_ref.as_deref())
        .await?;
    Ok(envelope(PaymentResponse::from(payment)))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<RefundPaymentBody>,
) -> AppResult<Json<serde_json::Value>> {
    let actor = actor_from_headers(&headers)?;
    let amount = body.amount.as_deref().map(parse_amount).transpose()?;
    let refund = state
        .orchestrator
        .create_refund(actor, id, amount, body.reason.as_deref())
        .await?;
    Ok(envelope(RefundResponse::from(refund)))
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub base_amount: String,
    pub fee_amount: String,
    pub total_amount: String,
}

impl From<FeeBreakdown> for QuoteResponse {
    fn from(f: FeeBreakdown) -> Self {
        Self {
            base_amount: f.base_amount.to_string(),
            fee_amount: f.fee_amount.to_string(),
            total_amount: f.total_amount.to_string(),
        }
    }
}

pub async fn quote_fees(
    Query(params): Query<QuoteParams>,
) -> AppResult<Json<serde_json::Value>> {
    let amount = parse_amount(&params.amount)?;
    let method = PaymentMethod::from_str(&params.payment_method).map_err(AppError::from)?;
    let currency = Currency::from_str(&params.currency).map_err(AppError::from)?;

    let fees = calculate_payment_fees(&amount, method, currency);
    Ok(envelope(QuoteResponse::from(fees)))
}

pub fn parse_amount(raw: &str) -> AppResult<BigDecimal> {
    let amount = BigDecimal::from_str(raw).map_err(|_| {
        AppError::validation(ValidationError::InvalidAmount {
            amount: raw.to_string(),
            reason: "not a decimal number".to_string(),
        })
    })?;
    if amount <= BigDecimal::from(0) {
        return Err(AppError::validation(ValidationError::InvalidAmount {
            amount: raw.to_string(),
            reason: "amount must be greater than zero".to_string(),
        }));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_must_be_positive_decimals() {
        assert!(parse_amount("100.50").is_ok());
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn caller_id_requires_a_valid_uuid_header() {
        let mut headers = HeaderMap::new();
        assert!(caller_id(&headers).is_err());

        headers.insert("x-user-id", "not-a-uuid".parse().unwrap());
        assert!(caller_id(&headers).is_err());

        let id = Uuid::new_v4();
        headers.insert("x-user-id", id.to_string().parse().unwrap());
        assert_eq!(caller_id(&headers).unwrap(), id);
    }

    #[test]
    fn admin_role_detection_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        assert!(!is_admin(&headers));
        headers.insert("x-user-role", "Admin".parse().unwrap());
        assert!(is_admin(&headers));
    }
}
