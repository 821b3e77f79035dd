//! Webhook endpoints
//!
//! Providers retry on non-2xx, so the contract is: 401 only when the
//! signature is missing or invalid, 200 for everything else. A processing
//! failure is already persisted in the event ledger with retry budget; a
//! provider-level redelivery would dedupe against it anyway.

use crate::api::AppState;
use crate::payments::types::ProviderName;
use crate::services::webhook_processor::WebhookProcessorError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use std::str::FromStr;
use tracing::{error, info, warn};
use uuid::Uuid;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = match headers.get("stripe-signature").and_then(|v| v.to_str().ok()) {
        Some(sig) => sig,
        None => {
            warn!("stripe webhook without Stripe-Signature header");
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "success": false,
                    "error": { "code": "INVALID_SIGNATURE", "message": "Missing signature" }
                })),
            );
        }
    };

    match state.webhooks.process_stripe(&body, signature).await {
        Ok(()) => ok_response(),
        Err(WebhookProcessorError::InvalidSignature { provider }) => {
            warn!(provider = %provider, "rejected webhook with invalid signature");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "success": false,
                    "error": { "code": "INVALID_SIGNATURE", "message": "Invalid signature" }
                })),
            )
        }
        Err(WebhookProcessorError::AlreadyProcessed { event_id }) => {
            info!(event_id = %event_id, "duplicate stripe event acknowledged");
            ok_response()
        }
        Err(e) => {
            error!(error = %e, "stripe webhook processing failed");
            ok_response()
        }
    }
}

pub async fn wallet_webhook(
    State(state): State<AppState>,
    Path((provider, payment_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let provider = match ProviderName::from_str(&provider) {
        Ok(p) if p != ProviderName::Stripe => p,
        _ => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "success": false,
                    "error": { "code": "VALIDATION_ERROR", "message": "Unknown provider" }
                })),
            );
        }
    };

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match state
        .webhooks
        .process_wallet(provider, payment_id, &body, signature)
        .await
    {
        Ok(()) => ok_response(),
        Err(WebhookProcessorError::InvalidSignature { provider }) => {
            warn!(provider = %provider, "rejected wallet callback with invalid signature");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "success": false,
                    "error": { "code": "INVALID_SIGNATURE", "message": "Invalid signature" }
                })),
            )
        }
        Err(WebhookProcessorError::AlreadyProcessed { event_id }) => {
            info!(event_id = %event_id, "duplicate wallet callback acknowledged");
            ok_response()
        }
        Err(e) => {
            error!(provider = %provider, payment_id = %payment_id, error = %e,
                "wallet callback processing failed");
            ok_response()
        }
    }
}

fn ok_response() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "success": true, "data": { "received": true } })),
    )
}
