use crate::errors::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

pub type UserId = String;
pub type RoundId = u64;
pub type WagerId = u64;

/// Sum of the two dice that pays the jackpot
pub const JACKPOT_SUM: u8 = 7;

/// Round lifecycle state.
///
/// Only `Open` and `Resolved` are stored while the round is live; `Locked`
/// is persisted once resolution begins. Before that, locking is derived from
/// the clock by [`Round::phase`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    Open,
    Locked,
    Resolved,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Open => write!(f, "open"),
            RoundState::Locked => write!(f, "locked"),
            RoundState::Resolved => write!(f, "resolved"),
        }
    }
}

/// One timed dice roll. Dice are fixed when the round is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: RoundId,
    pub created_at: DateTime<Utc>,
    pub roll_time: DateTime<Utc>,
    pub dice1: u8,
    pub dice2: u8,
    pub is_jackpot: bool,
    pub state: RoundState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn new(id: RoundId, created_at: DateTime<Utc>, roll_time: DateTime<Utc>, dice: (u8, u8)) -> Self {
        let (dice1, dice2) = dice;
        Self {
            id,
            created_at,
            roll_time,
            dice1,
            dice2,
            is_jackpot: dice1 + dice2 == JACKPOT_SUM,
            state: RoundState::Open,
            resolved_at: None,
        }
    }

    pub fn dice_sum(&self) -> u8 {
        self.dice1 + self.dice2
    }

    /// `max(0, roll_time - now)`
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.roll_time - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Wagers are accepted only while strictly more than `cutoff` remains
    pub fn accepts_wagers(&self, now: DateTime<Utc>, cutoff: Duration) -> bool {
        self.state == RoundState::Open && self.time_remaining(now) > cutoff
    }

    /// Lifecycle state as observed at `now`
    pub fn phase(&self, now: DateTime<Utc>, cutoff: Duration) -> RoundState {
        match self.state {
            RoundState::Open if !self.accepts_wagers(now, cutoff) => RoundState::Locked,
            state => state,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state == RoundState::Resolved
    }
}

/// Which outcome a wager backs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Side {
    Jackpot,
    NonJackpot,
}

impl Side {
    pub fn from_jackpot_flag(is_jackpot: bool) -> Self {
        if is_jackpot {
            Side::Jackpot
        } else {
            Side::NonJackpot
        }
    }

    pub fn is_jackpot(&self) -> bool {
        matches!(self, Side::Jackpot)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Jackpot => write!(f, "Lucky 7"),
            Side::NonJackpot => write!(f, "Not Lucky 7"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WagerOutcome {
    Pending,
    Won,
    Lost,
}

impl WagerOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WagerOutcome::Pending)
    }
}

/// A stake on one round by one user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Wager {
    pub id: WagerId,
    pub user_id: UserId,
    pub round_id: RoundId,
    pub amount: u64,
    pub side: Side,
    pub outcome: WagerOutcome,
    pub win_streak: u32,
    /// Tokens credited at settlement (0 until settled, 0 for losses)
    pub payout: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Wager {
    pub fn is_pending(&self) -> bool {
        self.outcome == WagerOutcome::Pending
    }

    pub fn is_win(&self) -> bool {
        self.outcome == WagerOutcome::Won
    }
}

/// Wager fields supplied by the caller; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewWager {
    pub user_id: UserId,
    pub round_id: RoundId,
    pub amount: u64,
    pub side: Side,
    pub created_at: DateTime<Utc>,
}

impl NewWager {
    pub fn into_wager(self, id: WagerId) -> Wager {
        Wager {
            id,
            user_id: self.user_id,
            round_id: self.round_id,
            amount: self.amount,
            side: self.side,
            outcome: WagerOutcome::Pending,
            win_streak: 0,
            payout: 0,
            created_at: self.created_at,
            settled_at: None,
        }
    }
}

/// A user's token account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub user_id: UserId,
    pub display_name: String,
    pub tokens: u64,
}

impl Account {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>, tokens: u64) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            tokens,
        }
    }

    /// Balance after crediting `amount`; an overflow is reported, never clamped
    pub fn credited(&self, amount: u64) -> Result<u64, LedgerError> {
        self.tokens
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow {
                user_id: self.user_id.clone(),
                balance: self.tokens,
                amount,
            })
    }
}

/// Terminal result for one wager, applied atomically with its credit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub wager_id: WagerId,
    pub user_id: UserId,
    pub outcome: WagerOutcome,
    pub win_streak: u32,
    pub payout: u64,
    pub settled_at: DateTime<Utc>,
}

/// Result of committing a settlement
#[derive(Debug, Clone)]
pub enum SettlementCommit {
    /// Wager flipped to its terminal outcome and the payout credited
    Applied { wager: Wager, balance: u64 },
    /// Wager was already terminal; nothing changed
    AlreadySettled(Wager),
}

/// Snapshot returned by the status query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub round_id: RoundId,
    /// Milliseconds until the roll
    pub time_until_next_roll: u64,
    pub is_wagering_allowed: bool,
}

/// A resolved wager joined with its round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecentRoll {
    pub wager_id: WagerId,
    pub round_id: RoundId,
    pub dice1: u8,
    pub dice2: u8,
    pub dice_sum: u8,
    pub is_lucky7: bool,
    pub roll_time: DateTime<Utc>,
    pub amount: u64,
    pub has_won: bool,
    pub is_lucky7_wager: bool,
    pub winnings: u64,
    pub win_streak: u32,
}

impl RecentRoll {
    pub fn from_parts(wager: &Wager, round: &Round) -> Self {
        Self {
            wager_id: wager.id,
            round_id: round.id,
            dice1: round.dice1,
            dice2: round.dice2,
            dice_sum: round.dice_sum(),
            is_lucky7: round.is_jackpot,
            roll_time: round.roll_time,
            amount: wager.amount,
            has_won: wager.is_win(),
            is_lucky7_wager: wager.side.is_jackpot(),
            winnings: wager.payout,
            win_streak: wager.win_streak,
        }
    }
}

/// One row of the win-streak leaderboard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub wager_id: WagerId,
    pub user_id: UserId,
    pub username: String,
    pub win_streak: u32,
    pub amount: u64,
    pub is_lucky7_wager: bool,
}
