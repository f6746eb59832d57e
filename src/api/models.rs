//! Request and response bodies
//!
//! Field names are camelCase on the wire.

use crate::game::types::{RoundId, UserId, Wager, WagerId, WagerOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_id: Option<RoundId>,
    pub connected_sessions: usize,
}

/// POST /api/game/wagers
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceWagerRequest {
    /// Whole tokens; fractional or non-positive values are rejected
    pub amount: f64,
    pub is_lucky7_wager: bool,
}

impl PlaceWagerRequest {
    /// Amount as whole tokens. Fractional and non-finite input maps to 0,
    /// which the controller rejects as an invalid amount.
    pub fn whole_amount(&self) -> i64 {
        if !self.amount.is_finite() || self.amount.fract() != 0.0 {
            return 0;
        }
        self.amount as i64
    }
}

/// Wager as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerView {
    pub id: WagerId,
    pub round_id: RoundId,
    pub user_id: UserId,
    pub amount: u64,
    pub is_lucky7_wager: bool,
    pub outcome: WagerOutcome,
    pub win_streak: u32,
    pub created_at: DateTime<Utc>,
}

impl From<Wager> for WagerView {
    fn from(wager: Wager) -> Self {
        Self {
            id: wager.id,
            round_id: wager.round_id,
            is_lucky7_wager: wager.side.is_jackpot(),
            user_id: wager.user_id,
            amount: wager.amount,
            outcome: wager.outcome,
            win_streak: wager.win_streak,
            created_at: wager.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceWagerResponse {
    pub message: String,
    pub wager: WagerView,
}

/// GET /api/game/recent-rolls
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentRollsQuery {
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// GET /api/users/:user_id/balance
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub username: String,
    pub tokens: u64,
}
