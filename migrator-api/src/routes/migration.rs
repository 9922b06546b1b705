//! Administrative trigger endpoint

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{Extension, Json};
use migrator_core::{Mint, TokenMigrationRecord};
use tracing::info;

use crate::auth::AuthClaims;
use crate::dto::{MigrationAction, MigrationRequest};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/v1/migration
///
/// Runs the requested operator action and returns the updated record.
pub async fn trigger_migration(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    body: Result<Json<MigrationRequest>, JsonRejection>,
) -> ApiResult<Json<TokenMigrationRecord>> {
    if !claims.is_operator() {
        return Err(ApiError::Forbidden(format!(
            "{} lacks the operator role",
            claims.sub
        )));
    }
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.mint.trim().is_empty() {
        return Err(ApiError::BadRequest("mint is required".to_string()));
    }

    let mint = Mint::new(request.mint.trim());
    info!(mint = %mint, action = ?request.step, sub = %claims.sub, "operator action requested");

    let record = match request.step {
        MigrationAction::Resume => state.operator.resume(&mint).await?,
        MigrationAction::Finalize => {
            state
                .operator
                .finalize(&mint, request.completed_step, request.receipt())
                .await?
        }
        MigrationAction::Withdraw => state.operator.withdraw(&mint).await?,
        MigrationAction::Harvest => state.operator.harvest(&mint).await?,
    };

    Ok(Json(record))
}
