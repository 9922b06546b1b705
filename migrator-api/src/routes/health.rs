//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};

use crate::dto::HealthResponse;
use crate::state::AppState;

/// Liveness; reports whether the token store answers
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_available = state.store().ping().await.is_ok();
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        store_available,
    })
}

/// Readiness; 503 while the token store is unreachable
pub async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_available = state.store().ping().await.is_ok();
    let (code, status) = if store_available {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: state.version.clone(),
            store_available,
        }),
    )
}
