//! Prometheus scrape endpoint

use super::handlers::AppState;
use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus_format(),
    )
}
