//! API route handlers

pub mod health;
pub mod migration;
pub mod tokens;
pub mod ws;

use axum::{middleware, routing::get, routing::post, Router};

use crate::auth::require_auth;
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/v1/migration", post(migration::trigger_migration))
        .route_layer(middleware::from_fn_with_state(state.auth.clone(), require_auth));

    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        // Read-only snapshots and event subscriptions
        .route("/api/v1/tokens/:mint", get(tokens::get_token))
        .route("/api/v1/tokens/:mint/events", get(ws::subscribe_events))
        // Administrative trigger surface
        .merge(admin)
        .with_state(state)
}
