//! Request Handlers

use super::{
    errors::ApiError,
    middleware::{RequestId, USER_ID_HEADER},
    models::*,
};
use crate::{
    game::{
        types::{GameStatus, LeaderboardEntry, RecentRoll, Side},
        RoundController,
    },
    metrics::GameMetrics,
    notifications::SessionRegistry,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::HeaderMap,
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub controller: Arc<RoundController>,
    pub sessions: Arc<SessionRegistry>,
    pub metrics: Arc<GameMetrics>,
    pub version: String,
}

impl AppState {
    pub fn new(controller: Arc<RoundController>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            metrics: controller.metrics().clone(),
            controller,
            sessions,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn caller_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// GET /api/health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let round_id = state.controller.current_round().await.map(|r| r.id);
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        round_id,
        connected_sessions: state.sessions.session_count(),
    })
}

/// POST /api/game/wagers
pub async fn place_wager_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<PlaceWagerRequest>, JsonRejection>,
) -> Result<Json<PlaceWagerResponse>, ApiError> {
    let user_id = caller_id(&headers).ok_or_else(|| {
        ApiError::unauthorized(request_id.0.clone(), "Missing user identity".to_string())
    })?;
    let Json(request) = payload
        .map_err(|e| ApiError::bad_request(request_id.0.clone(), e.body_text()))?;

    let side = Side::from_jackpot_flag(request.is_lucky7_wager);
    let wager = state
        .controller
        .place_wager(&user_id, request.whole_amount(), side)
        .await
        .map_err(|e| ApiError::from_wager(request_id.0.clone(), e))?;

    Ok(Json(PlaceWagerResponse {
        message: "Wager placed successfully".to_string(),
        wager: wager.into(),
    }))
}

/// GET /api/game/status
pub async fn game_status_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<GameStatus>, ApiError> {
    state
        .controller
        .status()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(request_id.0, "No active game".to_string()))
}

/// GET /api/game/recent-rolls?userId=
///
/// Falls back to the caller identity header when `userId` is absent.
pub async fn recent_rolls_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RecentRollsQuery>,
) -> Result<Json<Vec<RecentRoll>>, ApiError> {
    let user_id = query
        .user_id
        .or_else(|| caller_id(&headers))
        .ok_or_else(|| ApiError::bad_request(request_id.0.clone(), "userId is required".to_string()))?;

    state
        .controller
        .recent_rolls(&user_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_storage(request_id.0, e))
}

/// GET /api/game/win-streaks
pub async fn win_streaks_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    state
        .controller
        .leaderboard()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_storage(request_id.0, e))
}

/// GET /api/users/:user_id/balance
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state
        .controller
        .store()
        .get_account(&user_id)
        .await
        .map_err(|e| ApiError::from_storage(request_id.0.clone(), e))?
        .ok_or_else(|| ApiError::not_found(request_id.0.clone(), "User not found".to_string()))?;

    Ok(Json(BalanceResponse {
        user_id: account.user_id,
        username: account.display_name,
        tokens: account.tokens,
    }))
}
