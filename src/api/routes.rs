//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, monitoring::metrics_handler, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        // Game endpoints
        .route("/api/game/wagers", post(place_wager_handler))
        .route("/api/game/status", get(game_status_handler))
        .route("/api/game/recent-rolls", get(recent_rolls_handler))
        .route("/api/game/win-streaks", get(win_streaks_handler))
        // Pull-style reconciliation for clients that missed pushes
        .route("/api/users/:user_id/balance", get(balance_handler))
        .route("/ws", get(websocket_handler))
        // Metrics endpoint for Prometheus
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
