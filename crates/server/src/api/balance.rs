//! Balance and ledger handlers.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stockdesk_core::{BalanceLedger, LedgerEntry};

use super::{middleware::AuthUser, ApiError};
use crate::state::AppState;

const DEFAULT_LEDGER_LIMIT: i64 = 50;
const MAX_LEDGER_LIMIT: i64 = 500;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: u64,
}

#[derive(Debug, Deserialize)]
pub struct LedgerParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub entries: Vec<LedgerEntry>,
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state.store().get_balance(&user_id)?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// Most recent ledger entries first.
pub async fn get_ledger(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<LedgerParams>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEDGER_LIMIT)
        .clamp(1, MAX_LEDGER_LIMIT);
    let entries = state.store().history(&user_id, limit)?;
    Ok(Json(LedgerResponse { entries }))
}
