use crate::api::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

/// Liveness + database reachability, with pool stats for dashboards
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let stats = crate::database::pool_stats(&state.pool);

    match crate::database::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "database": "connected",
                "pool": {
                    "size": stats.size,
                    "idle": stats.num_idle,
                }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "database": "unreachable",
                "error": e.to_string(),
            })),
        ),
    }
}
