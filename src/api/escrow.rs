use crate::api::payments::{caller_id, is_admin, parse_amount};
use crate::api::AppState;
use crate::database::escrow_repository::EscrowAccount;
use crate::error::AppResult;
use crate::services::escrow_service::Actor;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateEscrowBody {
    pub transaction_id: Uuid,
    pub release_conditions: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct EscrowAmountBody {
    pub amount: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EscrowResponse {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub escrow_amount: String,
    pub funded_amount: String,
    pub released_amount: String,
    pub refunded_amount: String,
    pub currency: String,
    pub status: String,
    pub auto_release_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<EscrowAccount> for EscrowResponse {
    fn from(e: EscrowAccount) -> Self {
        Self {
            id: e.id,
            transaction_id: e.transaction_id,
            escrow_amount: e.escrow_amount.to_string(),
            funded_amount: e.funded_amount.to_string(),
            released_amount: e.released_amount.to_string(),
            refunded_amount: e.refunded_amount.to_string(),
            currency: e.currency,
            status: e.status,
            auto_release_at: e.auto_release_at,
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

/// Build the acting identity from the gateway-injected headers. Shared with
/// the payment handlers so every client-facing mutation names its caller.
pub(crate) fn actor_from_headers(headers: &HeaderMap) -> AppResult<Actor> {
    let caller = caller_id(headers)?;
    Ok(if is_admin(headers) {
        Actor::admin(caller)
    } else {
        Actor::user(caller)
    })
}

fn envelope(account: EscrowAccount) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": EscrowResponse::from(account)
    }))
}

pub async fn create_escrow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateEscrowBody>,
) -> AppResult<Json<serde_json::Value>> {
    let actor = actor_from_headers(&headers)?;
    let account = state
        .escrow
        .create_escrow_account(actor, body.transaction_id, body.release_conditions)
        .await?;
    Ok(envelope(account))
}

pub async fn get_escrow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let account = state.escrow.get_escrow_account(id).await?;
    Ok(envelope(account))
}

pub async fn release_escrow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<EscrowAmountBody>,
) -> AppResult<Json<serde_json::Value>> {
    let actor = actor_from_headers(&headers)?;
    let amount = body.amount.as_deref().map(parse_amount).transpose()?;
    let account = state.escrow.release_escrow_funds(actor, id, amount).await?;
    Ok(envelope(account))
}

pub async fn refund_escrow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<EscrowAmountBody>,
) -> AppResult<Json<serde_json::Value>> {
    let actor = actor_from_headers(&headers)?;
    let amount = body.amount.as_deref().map(parse_amount).transpose()?;
    let account = state.escrow.refund_escrow_funds(actor, id, amount).await?;
    Ok(envelope(account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::escrow_service::ActorRole;

    #[test]
    fn mutating_requests_without_identity_are_rejected() {
        let headers = HeaderMap::new();
        assert!(actor_from_headers(&headers).is_err());
    }

    #[test]
    fn role_header_selects_the_actor_kind() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", id.to_string().parse().unwrap());

        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.role, ActorRole::User);
        assert_eq!(actor.user_id, Some(id));

        headers.insert("x-user-role", "admin".parse().unwrap());
        assert_eq!(actor_from_headers(&headers).unwrap().role, ActorRole::Admin);
    }
}
