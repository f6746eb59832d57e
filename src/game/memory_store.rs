//! In-memory `GameStore` for tests and ephemeral runs

use crate::{
    errors::{LedgerError, StorageError},
    game::{
        store::{AccountStore, GameStore, RoundStore, WagerStore},
        types::{
            Account, NewWager, Round, RoundId, RoundState, Settlement, SettlementCommit, Wager,
            WagerId,
        },
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    rounds: BTreeMap<RoundId, Round>,
    wagers: BTreeMap<WagerId, Wager>,
    next_round_id: RoundId,
    next_wager_id: WagerId,
}

/// Every operation runs under one lock, so compound operations are atomic
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the given accounts
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let state = MemoryState {
            accounts: accounts
                .into_iter()
                .map(|a| (a.user_id.clone(), a))
                .collect(),
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }
}

fn missing_wager(wager_id: WagerId) -> LedgerError {
    LedgerError::Storage(StorageError::CorruptedData(format!(
        "wager {} not found",
        wager_id
    )))
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StorageError> {
        Ok(self.state.read().await.accounts.get(user_id).cloned())
    }

    async fn put_account(&self, account: &Account) -> Result<(), StorageError> {
        self.state
            .write()
            .await
            .accounts
            .insert(account.user_id.clone(), account.clone());
        Ok(())
    }

    async fn credit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        account.tokens = account.credited(amount)?;
        Ok(account.tokens)
    }

    async fn debit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
        if account.tokens < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: account.tokens,
                requested: amount,
            });
        }
        account.tokens -= amount;
        Ok(account.tokens)
    }
}

#[async_trait]
impl RoundStore for MemoryStore {
    async fn create_round(
        &self,
        created_at: DateTime<Utc>,
        roll_time: DateTime<Utc>,
        dice: (u8, u8),
    ) -> Result<Round, StorageError> {
        let mut state = self.state.write().await;
        state.next_round_id += 1;
        let round = Round::new(state.next_round_id, created_at, roll_time, dice);
        state.rounds.insert(round.id, round.clone());
        Ok(round)
    }

    async fn get_round(&self, round_id: RoundId) -> Result<Option<Round>, StorageError> {
        Ok(self.state.read().await.rounds.get(&round_id).cloned())
    }

    async fn update_round(&self, round: &Round) -> Result<(), StorageError> {
        self.state.write().await.rounds.insert(round.id, round.clone());
        Ok(())
    }

    async fn unresolved_rounds(&self) -> Result<Vec<Round>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .rounds
            .values()
            .filter(|r| r.state != RoundState::Resolved)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WagerStore for MemoryStore {
    async fn get_wager(&self, wager_id: WagerId) -> Result<Option<Wager>, StorageError> {
        Ok(self.state.read().await.wagers.get(&wager_id).cloned())
    }

    async fn wagers_for_round(&self, round_id: RoundId) -> Result<Vec<Wager>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .wagers
            .values()
            .filter(|w| w.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn wagers_for_user(
        &self,
        user_id: &str,
        limit: usize,
        settled_only: bool,
    ) -> Result<Vec<Wager>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .wagers
            .values()
            .rev()
            .filter(|w| w.user_id == user_id && (!settled_only || !w.is_pending()))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn last_settled_before(
        &self,
        user_id: &str,
        before: WagerId,
    ) -> Result<Option<Wager>, StorageError> {
        Ok(self
            .state
            .read()
            .await
            .wagers
            .range(..before)
            .rev()
            .map(|(_, w)| w)
            .find(|w| w.user_id == user_id && !w.is_pending())
            .cloned())
    }

    async fn top_streaks(&self, limit: usize) -> Result<Vec<Wager>, StorageError> {
        let state = self.state.read().await;
        let mut streaks: Vec<Wager> = state
            .wagers
            .values()
            .filter(|w| w.win_streak > 0)
            .cloned()
            .collect();
        streaks.sort_by(|a, b| b.win_streak.cmp(&a.win_streak).then(b.id.cmp(&a.id)));
        streaks.truncate(limit);
        Ok(streaks)
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn commit_placement(&self, wager: NewWager) -> Result<(Wager, u64), LedgerError> {
        let mut state = self.state.write().await;

        let account = state
            .accounts
            .get_mut(&wager.user_id)
            .ok_or_else(|| LedgerError::UserNotFound(wager.user_id.clone()))?;
        if account.tokens < wager.amount {
            return Err(LedgerError::InsufficientBalance {
                balance: account.tokens,
                requested: wager.amount,
            });
        }
        account.tokens -= wager.amount;
        let balance = account.tokens;

        state.next_wager_id += 1;
        let stored = wager.into_wager(state.next_wager_id);
        state.wagers.insert(stored.id, stored.clone());

        Ok((stored, balance))
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<SettlementCommit, LedgerError> {
        let mut state = self.state.write().await;

        let current = state
            .wagers
            .get(&settlement.wager_id)
            .cloned()
            .ok_or_else(|| missing_wager(settlement.wager_id))?;
        if current.outcome.is_terminal() {
            return Ok(SettlementCommit::AlreadySettled(current));
        }

        let account = state
            .accounts
            .get_mut(&settlement.user_id)
            .ok_or_else(|| LedgerError::UserNotFound(settlement.user_id.clone()))?;
        account.tokens = account.credited(settlement.payout)?;
        let balance = account.tokens;

        let wager = state
            .wagers
            .get_mut(&settlement.wager_id)
            .ok_or_else(|| missing_wager(settlement.wager_id))?;
        wager.outcome = settlement.outcome;
        wager.win_streak = settlement.win_streak;
        wager.payout = settlement.payout;
        wager.settled_at = Some(settlement.settled_at);

        Ok(SettlementCommit::Applied {
            wager: wager.clone(),
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::{Side, WagerOutcome};

    fn new_wager(user: &str, round_id: RoundId, amount: u64) -> NewWager {
        NewWager {
            user_id: user.to_string(),
            round_id,
            amount,
            side: Side::Jackpot,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_commit_placement_debits_and_records() {
        let store = MemoryStore::with_accounts([Account::new("alice", "Alice", 100)]);

        let (wager, balance) = store.commit_placement(new_wager("alice", 1, 30)).await.unwrap();
        assert_eq!(balance, 70);
        assert_eq!(wager.outcome, WagerOutcome::Pending);
        assert_eq!(store.wagers_for_round(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_placement_rejects_overdraft_without_side_effects() {
        let store = MemoryStore::with_accounts([Account::new("alice", "Alice", 10)]);

        let err = store.commit_placement(new_wager("alice", 1, 30)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { balance: 10, requested: 30 }));
        assert!(store.wagers_for_round(1).await.unwrap().is_empty());
        assert_eq!(store.get_account("alice").await.unwrap().unwrap().tokens, 10);
    }

    #[tokio::test]
    async fn test_commit_settlement_is_idempotent() {
        let store = MemoryStore::with_accounts([Account::new("alice", "Alice", 100)]);
        let (wager, _) = store.commit_placement(new_wager("alice", 1, 20)).await.unwrap();

        let settlement = Settlement {
            wager_id: wager.id,
            user_id: "alice".to_string(),
            outcome: WagerOutcome::Won,
            win_streak: 1,
            payout: 140,
            settled_at: Utc::now(),
        };

        let first = store.commit_settlement(&settlement).await.unwrap();
        assert!(matches!(first, SettlementCommit::Applied { balance: 220, .. }));

        let second = store.commit_settlement(&settlement).await.unwrap();
        assert!(matches!(second, SettlementCommit::AlreadySettled(_)));
        assert_eq!(store.get_account("alice").await.unwrap().unwrap().tokens, 220);
    }

    #[tokio::test]
    async fn test_overflowing_payout_leaves_wager_pending() {
        let store = MemoryStore::with_accounts([Account::new("alice", "Alice", u64::MAX - 10)]);
        let (wager, balance) = store.commit_placement(new_wager("alice", 1, 20)).await.unwrap();
        assert_eq!(balance, u64::MAX - 30);

        let settlement = Settlement {
            wager_id: wager.id,
            user_id: "alice".to_string(),
            outcome: WagerOutcome::Won,
            win_streak: 1,
            payout: 140,
            settled_at: Utc::now(),
        };
        let err = store.commit_settlement(&settlement).await.unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOverflow { amount: 140, .. }));

        assert!(store.get_wager(wager.id).await.unwrap().unwrap().is_pending());
        assert_eq!(store.get_account("alice").await.unwrap().unwrap().tokens, u64::MAX - 30);
        assert!(store.credit("alice", 31).await.is_err());
        assert_eq!(store.credit("alice", 30).await.unwrap(), u64::MAX);
    }

    #[tokio::test]
    async fn test_user_history_is_newest_first() {
        let store = MemoryStore::with_accounts([Account::new("alice", "Alice", 100)]);
        for round in 1..=3 {
            store.commit_placement(new_wager("alice", round, 1)).await.unwrap();
        }

        let history = store.wagers_for_user("alice", 2, false).await.unwrap();
        let rounds: Vec<_> = history.iter().map(|w| w.round_id).collect();
        assert_eq!(rounds, vec![3, 2]);

        assert!(store.wagers_for_user("alice", 5, true).await.unwrap().is_empty());
    }
}
