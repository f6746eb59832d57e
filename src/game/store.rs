//! Persistence interfaces for rounds, wagers and token accounts
//!
//! The round engine only talks to these traits. Two compound operations,
//! `commit_placement` and `commit_settlement`, must be applied atomically by
//! every implementation: they are what keeps balances consistent with the
//! wager history.

use crate::{
    errors::{LedgerError, StorageError},
    game::types::{
        Account, NewWager, Round, RoundId, Settlement, SettlementCommit, Wager, WagerId,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Token account storage
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StorageError>;

    /// Insert or replace an account
    async fn put_account(&self, account: &Account) -> Result<(), StorageError>;

    /// Add `amount` to a balance, returning the new balance
    async fn credit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError>;

    /// Subtract `amount` if the balance covers it, returning the new balance
    async fn debit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError>;
}

/// Append-only round history
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Allocate an id and persist a new Open round
    async fn create_round(
        &self,
        created_at: DateTime<Utc>,
        roll_time: DateTime<Utc>,
        dice: (u8, u8),
    ) -> Result<Round, StorageError>;

    async fn get_round(&self, round_id: RoundId) -> Result<Option<Round>, StorageError>;

    async fn update_round(&self, round: &Round) -> Result<(), StorageError>;

    /// Rounds in state Open or Locked, oldest first
    async fn unresolved_rounds(&self) -> Result<Vec<Round>, StorageError>;
}

/// Wager history and its secondary indexes
#[async_trait]
pub trait WagerStore: Send + Sync {
    async fn get_wager(&self, wager_id: WagerId) -> Result<Option<Wager>, StorageError>;

    /// All wagers for a round in creation order
    async fn wagers_for_round(&self, round_id: RoundId) -> Result<Vec<Wager>, StorageError>;

    /// A user's wagers, newest first. With `settled_only`, Pending wagers are skipped.
    async fn wagers_for_user(
        &self,
        user_id: &str,
        limit: usize,
        settled_only: bool,
    ) -> Result<Vec<Wager>, StorageError>;

    /// Most recent settled wager of `user_id` created before `before`
    async fn last_settled_before(
        &self,
        user_id: &str,
        before: WagerId,
    ) -> Result<Option<Wager>, StorageError>;

    /// Wagers with a positive streak, highest streak first, newest first on ties
    async fn top_streaks(&self, limit: usize) -> Result<Vec<Wager>, StorageError>;
}

/// Full store used by the round engine
#[async_trait]
pub trait GameStore: AccountStore + RoundStore + WagerStore {
    /// Check the balance, debit `wager.amount` and insert the Pending wager as one unit.
    ///
    /// Returns the stored wager and the new balance.
    async fn commit_placement(&self, wager: NewWager) -> Result<(Wager, u64), LedgerError>;

    /// Flip a Pending wager to its terminal outcome and credit the payout as one unit.
    ///
    /// A wager that is already terminal is returned untouched as `AlreadySettled`.
    async fn commit_settlement(&self, settlement: &Settlement) -> Result<SettlementCommit, LedgerError>;
}
