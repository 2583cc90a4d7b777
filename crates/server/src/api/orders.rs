//! Order API handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stockdesk_core::{
    orchestrator::RedownloadResponse, CommitRequest, CommitResponse, PreviewItem, PreviewRequest,
    PreviewResponse, ResponseType, Task, TaskFilter, TaskStatus, TaskStore,
};

use super::{middleware::AuthUser, ApiError};
use crate::state::AppState;

/// Maximum allowed limit for task listings
const MAX_LIMIT: i64 = 1000;

/// Default limit for task listings
const DEFAULT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct PreviewBody {
    pub items: Vec<PreviewItem>,
    #[serde(default)]
    pub response_type: ResponseType,
}

#[derive(Debug, Deserialize)]
pub struct CommitBody {
    pub task_ids: Vec<String>,
    #[serde(default)]
    pub response_type: Option<ResponseType>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersParams {
    pub status: Option<String>,
    pub batch_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListOrdersResponse {
    pub tasks: Vec<Task>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct RedownloadParams {
    pub response_type: Option<ResponseType>,
}

/// Resolve and price up to five items. Nothing is charged.
pub async fn preview_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<PreviewBody>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let response = state
        .orchestrator()
        .preview_order(PreviewRequest {
            user_id,
            items: body.items,
            response_type: body.response_type,
        })
        .await?;
    Ok(Json(response))
}

/// Charge and place previewed tasks. Per-task failures are reported in the
/// body; the request itself succeeds.
pub async fn commit_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CommitBody>,
) -> Result<Json<CommitResponse>, ApiError> {
    let response = state
        .orchestrator()
        .commit_order(CommitRequest {
            user_id,
            task_ids: body.task_ids,
            response_type: body.response_type,
        })
        .await?;
    Ok(Json(response))
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<ListOrdersResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = TaskFilter::new()
        .with_user(user_id)
        .with_limit(limit)
        .with_offset(offset);
    if let Some(status) = params.status {
        let status = status
            .parse::<TaskStatus>()
            .map_err(ApiError::bad_request)?;
        filter = filter.with_status(status);
    }
    if let Some(batch_id) = params.batch_id {
        filter = filter.with_batch(batch_id);
    }

    let tasks = state.store().list_tasks(&filter)?;
    Ok(Json(ListOrdersResponse {
        tasks,
        limit,
        offset,
    }))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.orchestrator().get_task(&id, &user_id)?))
}

/// Poll the vendor until the task is terminal. Used when background polling
/// is disabled. Conflicts if the task already has a poller.
pub async fn poll_order(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    state.orchestrator().get_task(&id, &user_id)?;
    Ok(Json(state.orchestrator().poll_order(&id).await?))
}

/// Issue a fresh download link for a finished task. Never charges.
pub async fn redownload(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<RedownloadParams>,
) -> Result<Json<RedownloadResponse>, ApiError> {
    let response = state
        .orchestrator()
        .redownload(&id, &user_id, params.response_type)
        .await?;
    Ok(Json(response))
}
