use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use stockdesk_core::orchestrator::BatchStatusResponse;

use super::{middleware::AuthUser, ApiError};
use crate::state::AppState;

/// Batch status with per-status counts and its tasks.
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<BatchStatusResponse>, ApiError> {
    let status = state.orchestrator().get_batch_status(&id)?;
    if status.batch.user_id != user_id {
        return Err(ApiError::not_found(format!("batch not found: {}", id)));
    }
    Ok(Json(status))
}
