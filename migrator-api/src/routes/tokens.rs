//! Token snapshot endpoint

use axum::extract::{Path, State};
use axum::Json;
use migrator_core::{MigratorError, Mint};

use crate::dto::TokenResponse;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Point-in-time view of a mint's migration record
pub async fn get_token(
    State(state): State<AppState>,
    Path(mint): Path<String>,
) -> ApiResult<Json<TokenResponse>> {
    let record = match state.operator.snapshot(&Mint::new(mint)).await {
        Ok(record) => record,
        Err(MigratorError::UnknownMint(mint)) => {
            return Err(ApiError::NotFound(format!("token {}", mint)))
        }
        Err(e) => return Err(e.into()),
    };
    let progress_summary = record
        .migration_progress
        .summary(state.operator.workflow());

    Ok(Json(TokenResponse {
        record,
        progress_summary,
    }))
}
