pub mod escrow;
pub mod payments;
pub mod webhooks;

use crate::services::escrow_service::EscrowManager;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::webhook_processor::WebhookProcessor;
use axum::http::HeaderName;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub escrow: Arc<EscrowManager>,
    pub webhooks: Arc<WebhookProcessor>,
    pub pool: PgPool,
}

pub fn build_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/payments", post(payments::create_payment))
        .route("/payments/{id}", get(payments::get_payment))
        .route("/payments/{id}/process", post(payments::process_payment))
        .route("/payments/{id}/refund", post(payments::refund_payment))
        .route("/payments/quote", get(payments::quote_fees))
        .route("/escrow", post(escrow::create_escrow))
        .route("/escrow/{id}", get(escrow::get_escrow))
        .route("/escrow/{id}/release", post(escrow::release_escrow))
        .route("/escrow/{id}/refund", post(escrow::refund_escrow))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route(
            "/webhooks/{provider}/{payment_id}",
            post(webhooks::wallet_webhook),
        )
        .route("/health", get(crate::health::health_check))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}
