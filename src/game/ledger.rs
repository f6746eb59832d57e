//! Token balances with per-user serialization
//!
//! Every balance mutation for a user runs under that user's async mutex and
//! emits a `token_update` event with the new absolute balance.

use crate::{
    errors::LedgerError,
    game::{
        store::GameStore,
        types::{NewWager, Settlement, SettlementCommit, UserId, Wager},
    },
    notifications::{GameEvent, Notifier},
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn GameStore>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<DashMap<UserId, Arc<Mutex<()>>>>,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn GameStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(user_id.to_string()).or_default().value().clone()
    }

    fn emit_balance(&self, user_id: &str, tokens: u64) {
        debug!(user_id, tokens, "Balance changed");
        self.notifier
            .send_to_user(user_id, GameEvent::TokenUpdate { tokens });
    }

    pub async fn balance(&self, user_id: &str) -> Result<u64, LedgerError> {
        self.store
            .get_account(user_id)
            .await?
            .map(|account| account.tokens)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
    }

    pub async fn debit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let tokens = self.store.debit(user_id, amount).await?;
        self.emit_balance(user_id, tokens);
        Ok(tokens)
    }

    pub async fn credit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;
        let tokens = self.store.credit(user_id, amount).await?;
        self.emit_balance(user_id, tokens);
        Ok(tokens)
    }

    /// Debit the stake and record the Pending wager as one step
    pub async fn place(&self, wager: NewWager) -> Result<Wager, LedgerError> {
        let user_id = wager.user_id.clone();
        let lock = self.user_lock(&user_id);
        let _guard = lock.lock().await;
        let (stored, tokens) = self.store.commit_placement(wager).await?;
        self.emit_balance(&user_id, tokens);
        Ok(stored)
    }

    /// Apply a settlement and credit its payout, once.
    ///
    /// A balance event is emitted only when the settlement was applied.
    pub async fn settle(&self, settlement: &Settlement) -> Result<SettlementCommit, LedgerError> {
        let lock = self.user_lock(&settlement.user_id);
        let _guard = lock.lock().await;
        let commit = self.store.commit_settlement(settlement).await?;
        if let SettlementCommit::Applied { balance, .. } = &commit {
            self.emit_balance(&settlement.user_id, *balance);
        }
        Ok(commit)
    }
}
