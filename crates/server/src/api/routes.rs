use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::middleware::{auth_middleware, metrics_middleware};
use super::{balance, batches, handlers, orders};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Routes acting on behalf of a user
    let user_routes = Router::new()
        .route("/sites", get(handlers::list_sites))
        .route("/orders", get(orders::list_orders))
        .route("/orders/preview", post(orders::preview_order))
        .route("/orders/commit", post(orders::commit_order))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/poll", post(orders::poll_order))
        .route("/orders/{id}/redownload", post(orders::redownload))
        .route("/batches/{id}", get(batches::get_batch))
        .route("/balance", get(balance::get_balance))
        .route("/ledger", get(balance::get_ledger))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/status", get(handlers::get_status))
        .route("/metrics", get(handlers::get_metrics))
        .merge(user_routes)
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
