//! Persistent `GameStore` on RocksDB.
//!
//! Records are JSON values under prefixed keys. Secondary indexes are empty
//! values whose key encodes the ordering:
//!
//! - `idx:round:wagers:` | round(be) | wager(be): wagers of a round, oldest first
//! - `idx:user:wagers:` | user | 0x00 | inv_wager(be): a user's wagers, newest first
//! - `idx:user:settled:` | user | 0x00 | inv_wager(be): same, settled only
//! - `idx:streak:` | inv_streak(be) | inv_wager(be): leaderboard order
//! - `idx:round:unresolved:` | round(be): rounds not yet Resolved
//!
//! Read-modify-write operations run under a single writer lock and commit
//! through one `WriteBatch`.

use crate::{
    errors::{LedgerError, StorageError},
    game::{
        store::{AccountStore, GameStore, RoundStore, WagerStore},
        types::{
            Account, NewWager, Round, RoundId, RoundState, Settlement, SettlementCommit, Wager,
            WagerId,
        },
    },
    storage::{OptimizedStorage, StorageBatch},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;

const ACCOUNT_PREFIX: &[u8] = b"account:";
const ROUND_PREFIX: &[u8] = b"round:";
const WAGER_PREFIX: &[u8] = b"wager:";
const ROUND_WAGERS_PREFIX: &[u8] = b"idx:round:wagers:";
const UNRESOLVED_ROUNDS_PREFIX: &[u8] = b"idx:round:unresolved:";
const USER_WAGERS_PREFIX: &[u8] = b"idx:user:wagers:";
const USER_SETTLED_PREFIX: &[u8] = b"idx:user:settled:";
const STREAK_PREFIX: &[u8] = b"idx:streak:";
const NEXT_ROUND_ID_KEY: &[u8] = b"meta:next_round_id";
const NEXT_WAGER_ID_KEY: &[u8] = b"meta:next_wager_id";

const SCAN_PAGE: usize = 256;

fn key(prefix: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let len = prefix.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    key.extend_from_slice(prefix);
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

fn account_key(user_id: &str) -> Vec<u8> {
    key(ACCOUNT_PREFIX, &[user_id.as_bytes()])
}

fn round_key(round_id: RoundId) -> Vec<u8> {
    key(ROUND_PREFIX, &[&round_id.to_be_bytes()])
}

fn unresolved_key(round_id: RoundId) -> Vec<u8> {
    key(UNRESOLVED_ROUNDS_PREFIX, &[&round_id.to_be_bytes()])
}

fn wager_key(wager_id: WagerId) -> Vec<u8> {
    key(WAGER_PREFIX, &[&wager_id.to_be_bytes()])
}

fn round_wagers_prefix(round_id: RoundId) -> Vec<u8> {
    key(ROUND_WAGERS_PREFIX, &[&round_id.to_be_bytes()])
}

fn round_wager_key(round_id: RoundId, wager_id: WagerId) -> Vec<u8> {
    key(ROUND_WAGERS_PREFIX, &[&round_id.to_be_bytes(), &wager_id.to_be_bytes()])
}

fn user_prefix(prefix: &[u8], user_id: &str) -> Vec<u8> {
    key(prefix, &[user_id.as_bytes(), &[0u8]])
}

fn user_index_key(prefix: &[u8], user_id: &str, wager_id: WagerId) -> Vec<u8> {
    let inv = u64::MAX - wager_id;
    key(prefix, &[user_id.as_bytes(), &[0u8], &inv.to_be_bytes()])
}

fn streak_key(win_streak: u32, wager_id: WagerId) -> Vec<u8> {
    let inv_streak = u32::MAX - win_streak;
    let inv_wager = u64::MAX - wager_id;
    key(STREAK_PREFIX, &[&inv_streak.to_be_bytes(), &inv_wager.to_be_bytes()])
}

/// Trailing big-endian u64 of an index key
fn trailing_u64(key: &[u8]) -> Option<u64> {
    let off = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[off..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::WriteFailed(e.to_string()))
}

pub struct RocksStore {
    storage: OptimizedStorage,
    writer: Mutex<()>,
}

impl RocksStore {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self {
            storage,
            writer: Mutex::new(()),
        }
    }

    fn load<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StorageError> {
        match self.storage.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StorageError::CorruptedData(format!(
                    "Failed to decode {}: {}",
                    String::from_utf8_lossy(key),
                    e
                ))
            }),
            None => Ok(None),
        }
    }

    fn load_counter(&self, key: &[u8]) -> Result<u64, StorageError> {
        match self.storage.get(key)? {
            Some(bytes) => trailing_u64(&bytes)
                .ok_or_else(|| StorageError::CorruptedData("Invalid counter bytes".to_string())),
            None => Ok(0),
        }
    }

    /// Resolve wager ids encoded at the end of index keys
    fn load_indexed_wagers(
        &self,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        limit: usize,
        decode_id: impl Fn(u64) -> WagerId,
    ) -> Result<Vec<Wager>, StorageError> {
        let rows = self.storage.scan_prefix(prefix, cursor, limit)?;
        let mut wagers = Vec::with_capacity(rows.len());
        for (index_key, _) in rows {
            let raw = trailing_u64(&index_key)
                .ok_or_else(|| StorageError::CorruptedData("Invalid index key".to_string()))?;
            let wager_id = decode_id(raw);
            match self.load::<Wager>(&wager_key(wager_id))? {
                Some(wager) => wagers.push(wager),
                None => tracing::warn!(wager_id, "Index entry points at missing wager"),
            }
        }
        Ok(wagers)
    }

    fn load_account_for_update(&self, user_id: &str) -> Result<Account, LedgerError> {
        self.load::<Account>(&account_key(user_id))?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
    }
}

#[async_trait]
impl AccountStore for RocksStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StorageError> {
        self.load(&account_key(user_id))
    }

    async fn put_account(&self, account: &Account) -> Result<(), StorageError> {
        let _guard = self.writer.lock().await;
        self.storage.put(&account_key(&account.user_id), &encode(account)?)
    }

    async fn credit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let _guard = self.writer.lock().await;
        let mut account = self.load_account_for_update(user_id)?;
        account.tokens = account.credited(amount)?;
        self.storage.put(&account_key(user_id), &encode(&account)?)?;
        Ok(account.tokens)
    }

    async fn debit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let _guard = self.writer.lock().await;
        let mut account = self.load_account_for_update(user_id)?;
        if account.tokens < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: account.tokens,
                requested: amount,
            });
        }
        account.tokens -= amount;
        self.storage.put(&account_key(user_id), &encode(&account)?)?;
        Ok(account.tokens)
    }
}

#[async_trait]
impl RoundStore for RocksStore {
    async fn create_round(
        &self,
        created_at: DateTime<Utc>,
        roll_time: DateTime<Utc>,
        dice: (u8, u8),
    ) -> Result<Round, StorageError> {
        let _guard = self.writer.lock().await;
        let round_id = self.load_counter(NEXT_ROUND_ID_KEY)? + 1;
        let round = Round::new(round_id, created_at, roll_time, dice);

        let mut batch = StorageBatch::new();
        batch.put(round_key(round_id), encode(&round)?);
        batch.put(unresolved_key(round_id), b"");
        batch.put(NEXT_ROUND_ID_KEY, round_id.to_be_bytes());
        self.storage.write(batch)?;

        Ok(round)
    }

    async fn get_round(&self, round_id: RoundId) -> Result<Option<Round>, StorageError> {
        self.load(&round_key(round_id))
    }

    async fn update_round(&self, round: &Round) -> Result<(), StorageError> {
        let _guard = self.writer.lock().await;
        let mut batch = StorageBatch::new();
        batch.put(round_key(round.id), encode(round)?);
        if round.state == RoundState::Resolved {
            batch.delete(unresolved_key(round.id));
        } else {
            batch.put(unresolved_key(round.id), b"");
        }
        self.storage.write(batch)
    }

    async fn unresolved_rounds(&self) -> Result<Vec<Round>, StorageError> {
        let rows = self
            .storage
            .scan_prefix(UNRESOLVED_ROUNDS_PREFIX, None, usize::MAX)?;
        let mut rounds = Vec::with_capacity(rows.len());
        for (index_key, _) in rows {
            let round_id = trailing_u64(&index_key)
                .ok_or_else(|| StorageError::CorruptedData("Invalid round index key".to_string()))?;
            if let Some(round) = self.load::<Round>(&round_key(round_id))? {
                rounds.push(round);
            }
        }
        Ok(rounds)
    }
}

#[async_trait]
impl WagerStore for RocksStore {
    async fn get_wager(&self, wager_id: WagerId) -> Result<Option<Wager>, StorageError> {
        self.load(&wager_key(wager_id))
    }

    async fn wagers_for_round(&self, round_id: RoundId) -> Result<Vec<Wager>, StorageError> {
        let prefix = round_wagers_prefix(round_id);
        let mut wagers = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;
        loop {
            let rows = self.storage.scan_prefix(&prefix, cursor.as_deref(), SCAN_PAGE)?;
            let page_len = rows.len();
            for (index_key, _) in &rows {
                let wager_id = trailing_u64(index_key)
                    .ok_or_else(|| StorageError::CorruptedData("Invalid index key".to_string()))?;
                if let Some(wager) = self.load::<Wager>(&wager_key(wager_id))? {
                    wagers.push(wager);
                }
            }
            if page_len < SCAN_PAGE {
                break;
            }
            cursor = rows.last().map(|(k, _)| k.clone());
        }
        Ok(wagers)
    }

    async fn wagers_for_user(
        &self,
        user_id: &str,
        limit: usize,
        settled_only: bool,
    ) -> Result<Vec<Wager>, StorageError> {
        let index = if settled_only {
            USER_SETTLED_PREFIX
        } else {
            USER_WAGERS_PREFIX
        };
        let prefix = user_prefix(index, user_id);
        self.load_indexed_wagers(&prefix, None, limit, |inv| u64::MAX - inv)
    }

    async fn last_settled_before(
        &self,
        user_id: &str,
        before: WagerId,
    ) -> Result<Option<Wager>, StorageError> {
        let prefix = user_prefix(USER_SETTLED_PREFIX, user_id);
        let cursor = user_index_key(USER_SETTLED_PREFIX, user_id, before);
        let mut found = self.load_indexed_wagers(&prefix, Some(&cursor), 1, |inv| u64::MAX - inv)?;
        Ok(found.pop())
    }

    async fn top_streaks(&self, limit: usize) -> Result<Vec<Wager>, StorageError> {
        self.load_indexed_wagers(STREAK_PREFIX, None, limit, |inv| u64::MAX - inv)
    }
}

#[async_trait]
impl GameStore for RocksStore {
    async fn commit_placement(&self, wager: NewWager) -> Result<(Wager, u64), LedgerError> {
        let _guard = self.writer.lock().await;

        let mut account = self.load_account_for_update(&wager.user_id)?;
        if account.tokens < wager.amount {
            return Err(LedgerError::InsufficientBalance {
                balance: account.tokens,
                requested: wager.amount,
            });
        }
        account.tokens -= wager.amount;

        let wager_id = self.load_counter(NEXT_WAGER_ID_KEY)? + 1;
        let stored = wager.into_wager(wager_id);

        let mut batch = StorageBatch::new();
        batch.put(account_key(&account.user_id), encode(&account)?);
        batch.put(wager_key(wager_id), encode(&stored)?);
        batch.put(round_wager_key(stored.round_id, wager_id), b"");
        batch.put(user_index_key(USER_WAGERS_PREFIX, &stored.user_id, wager_id), b"");
        batch.put(NEXT_WAGER_ID_KEY, wager_id.to_be_bytes());
        self.storage.write(batch)?;

        Ok((stored, account.tokens))
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<SettlementCommit, LedgerError> {
        let _guard = self.writer.lock().await;

        let mut wager: Wager = self.load(&wager_key(settlement.wager_id))?.ok_or_else(|| {
            LedgerError::Storage(StorageError::CorruptedData(format!(
                "wager {} not found",
                settlement.wager_id
            )))
        })?;
        if wager.outcome.is_terminal() {
            return Ok(SettlementCommit::AlreadySettled(wager));
        }

        let mut account = self.load_account_for_update(&settlement.user_id)?;
        account.tokens = account.credited(settlement.payout)?;

        wager.outcome = settlement.outcome;
        wager.win_streak = settlement.win_streak;
        wager.payout = settlement.payout;
        wager.settled_at = Some(settlement.settled_at);

        let mut batch = StorageBatch::new();
        batch.put(account_key(&account.user_id), encode(&account)?);
        batch.put(wager_key(wager.id), encode(&wager)?);
        batch.put(user_index_key(USER_SETTLED_PREFIX, &wager.user_id, wager.id), b"");
        if wager.win_streak > 0 {
            batch.put(streak_key(wager.win_streak, wager.id), b"");
        }
        self.storage.write(batch)?;

        Ok(SettlementCommit::Applied {
            wager,
            balance: account.tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::types::{Side, WagerOutcome};

    fn open_store(dir: &tempfile::TempDir) -> RocksStore {
        RocksStore::new(OptimizedStorage::new(dir.path()).expect("open rocksdb"))
    }

    async fn place(store: &RocksStore, user: &str, round_id: RoundId, amount: u64) -> Wager {
        store
            .commit_placement(NewWager {
                user_id: user.to_string(),
                round_id,
                amount,
                side: Side::NonJackpot,
                created_at: Utc::now(),
            })
            .await
            .expect("placement")
            .0
    }

    async fn settle(store: &RocksStore, wager: &Wager, outcome: WagerOutcome, streak: u32, payout: u64) {
        store
            .commit_settlement(&Settlement {
                wager_id: wager.id,
                user_id: wager.user_id.clone(),
                outcome,
                win_streak: streak,
                payout,
                settled_at: Utc::now(),
            })
            .await
            .expect("settlement");
    }

    #[test]
    fn test_index_keys_sort_newest_first() {
        let older = user_index_key(USER_WAGERS_PREFIX, "alice", 1);
        let newer = user_index_key(USER_WAGERS_PREFIX, "alice", 2);
        assert!(newer < older);

        let high = streak_key(5, 1);
        let low = streak_key(2, 9);
        assert!(high < low);
    }

    #[tokio::test]
    async fn test_round_ids_and_unresolved_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();

        let first = store.create_round(now, now, (3, 4)).await.unwrap();
        let second = store.create_round(now, now, (1, 1)).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert!(first.is_jackpot);

        let mut resolved = first.clone();
        resolved.state = RoundState::Resolved;
        store.update_round(&resolved).await.unwrap();

        let unresolved = store.unresolved_rounds().await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, 2);
    }

    #[tokio::test]
    async fn test_placement_and_settlement_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.put_account(&Account::new("alice", "Alice", 100)).await.unwrap();

        let w1 = place(&store, "alice", 1, 10).await;
        let w2 = place(&store, "alice", 1, 10).await;
        let w3 = place(&store, "alice", 2, 10).await;
        assert_eq!(store.get_account("alice").await.unwrap().unwrap().tokens, 70);
        assert_eq!(store.wagers_for_round(1).await.unwrap().len(), 2);

        settle(&store, &w1, WagerOutcome::Won, 1, 10).await;
        settle(&store, &w2, WagerOutcome::Won, 2, 10).await;

        let last = store.last_settled_before("alice", w3.id).await.unwrap().unwrap();
        assert_eq!(last.id, w2.id);
        let last = store.last_settled_before("alice", w2.id).await.unwrap().unwrap();
        assert_eq!(last.id, w1.id);
        assert!(store.last_settled_before("alice", w1.id).await.unwrap().is_none());

        let settled = store.wagers_for_user("alice", 5, true).await.unwrap();
        assert_eq!(settled.iter().map(|w| w.id).collect::<Vec<_>>(), vec![w2.id, w1.id]);

        let top = store.top_streaks(10).await.unwrap();
        assert_eq!(top.iter().map(|w| w.win_streak).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_overflowing_credit_is_rejected_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store
            .put_account(&Account::new("alice", "Alice", u64::MAX - 5))
            .await
            .unwrap();
        let wager = place(&store, "alice", 1, 10).await;

        let err = store
            .commit_settlement(&Settlement {
                wager_id: wager.id,
                user_id: "alice".to_string(),
                outcome: WagerOutcome::Won,
                win_streak: 1,
                payout: 70,
                settled_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOverflow { .. }));

        assert!(store.get_wager(wager.id).await.unwrap().unwrap().is_pending());
        assert!(store.top_streaks(10).await.unwrap().is_empty());
        assert_eq!(
            store.get_account("alice").await.unwrap().unwrap().tokens,
            u64::MAX - 15
        );
        assert!(store.credit("alice", 16).await.is_err());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(&dir);
            store.put_account(&Account::new("bob", "Bob", 50)).await.unwrap();
            place(&store, "bob", 1, 20).await;
        }

        let store = open_store(&dir);
        assert_eq!(store.get_account("bob").await.unwrap().unwrap().tokens, 30);
        let next = place(&store, "bob", 1, 5).await;
        assert_eq!(next.id, 2);
    }
}
