mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{demo_accounts, Harness};
use lucky7::{
    config::RoundConfig,
    errors::{LedgerError, StorageError, WagerError},
    game::{
        types::{
            Account, NewWager, Round, RoundId, RoundState, Settlement, SettlementCommit, Side,
            Wager, WagerId, WagerOutcome,
        },
        AccountStore, GameStore, MemoryStore, RoundController, RoundStore, ScriptedDice,
        WagerStore,
    },
    notifications::{GameEvent, NullNotifier},
};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

#[tokio::test]
async fn test_jackpot_then_plain_win_then_loss() {
    let h = Harness::new();

    // (3,4): jackpot wager of 20 pays 140
    let round = h.open((3, 4)).await;
    assert!(round.is_jackpot);
    let first = h.controller.place_wager("alice", 20, Side::Jackpot).await.unwrap();
    assert_eq!(first.outcome, WagerOutcome::Pending);
    assert_eq!(h.balance("alice").await, 80);

    h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(h.balance("alice").await, 220);
    let first = h.controller.store().get_wager(first.id).await.unwrap().unwrap();
    assert_eq!(first.outcome, WagerOutcome::Won);
    assert_eq!(first.win_streak, 1);
    assert_eq!(first.payout, 140);

    // (2,2): non-jackpot wager of 50 returns the stake and extends the streak
    let round = h.open((2, 2)).await;
    let second = h.controller.place_wager("alice", 50, Side::NonJackpot).await.unwrap();
    assert_eq!(h.balance("alice").await, 170);
    h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(h.balance("alice").await, 220);
    let second = h.controller.store().get_wager(second.id).await.unwrap().unwrap();
    assert_eq!(second.outcome, WagerOutcome::Won);
    assert_eq!(second.win_streak, 2);

    // (1,1): jackpot wager loses, stake stays debited
    let round = h.open((1, 1)).await;
    let third = h.controller.place_wager("alice", 10, Side::Jackpot).await.unwrap();
    h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(h.balance("alice").await, 210);
    let third = h.controller.store().get_wager(third.id).await.unwrap().unwrap();
    assert_eq!(third.outcome, WagerOutcome::Lost);
    assert_eq!(third.win_streak, 0);
    assert_eq!(third.payout, 0);

    // a win after a loss restarts at 1
    let round = h.open((6, 1)).await;
    let fourth = h.controller.place_wager("alice", 10, Side::Jackpot).await.unwrap();
    h.controller.resolve_round(round.id).await.unwrap();
    let fourth = h.controller.store().get_wager(fourth.id).await.unwrap().unwrap();
    assert_eq!(fourth.win_streak, 1);
    assert_eq!(h.balance("alice").await, 270);
}

#[tokio::test]
async fn test_settlement_pushes_events() {
    let h = Harness::new();
    let round = h.open((3, 4)).await;
    h.controller.place_wager("alice", 20, Side::Jackpot).await.unwrap();
    h.notifier.clear();

    h.controller.resolve_round(round.id).await.unwrap();

    let events = h.notifier.for_user("alice");
    assert_eq!(events[0], GameEvent::TokenUpdate { tokens: 220 });
    assert_eq!(
        events[1],
        GameEvent::RollResult {
            won: true,
            winnings: 140,
            dice_sum: 7
        }
    );
    match &events[2] {
        GameEvent::RecentRolls { rolls } => {
            assert_eq!(rolls.len(), 1);
            assert!(rolls[0].has_won);
            assert!(rolls[0].is_lucky7);
            assert_eq!(rolls[0].dice_sum, 7);
        }
        other => panic!("expected recent rolls, got {:?}", other),
    }

    let broadcasts = h.notifier.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    match &broadcasts[0] {
        GameEvent::WinStreaks { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].username, "Alice");
            assert_eq!(entries[0].win_streak, 1);
        }
        other => panic!("expected leaderboard, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cutoff_boundary() {
    let h = Harness::new();
    h.open((1, 2)).await;

    // 15s round, 5s cutoff: 5.001s left is still open
    h.clock.advance(chrono::Duration::milliseconds(9_999));
    assert!(h.controller.place_wager("alice", 1, Side::Jackpot).await.is_ok());

    h.clock.advance(chrono::Duration::milliseconds(1));
    assert!(matches!(
        h.controller.place_wager("alice", 1, Side::Jackpot).await,
        Err(WagerError::BettingClosed)
    ));
    assert_eq!(h.balance("alice").await, 99);

    let status = h.controller.status().await.unwrap();
    assert_eq!(status.time_until_next_roll, 5_000);
    assert!(!status.is_wagering_allowed);
}

#[tokio::test]
async fn test_concurrent_placements_one_succeeds() {
    let h = Harness::new();
    h.open((1, 2)).await;

    let a = {
        let c = h.controller.clone();
        tokio::spawn(async move { c.place_wager("alice", 60, Side::Jackpot).await })
    };
    let b = {
        let c = h.controller.clone();
        tokio::spawn(async move { c.place_wager("alice", 60, Side::NonJackpot).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(WagerError::InsufficientBalance)))
            .count(),
        1
    );
    assert_eq!(h.balance("alice").await, 40);
}

#[tokio::test]
async fn test_double_resolution_pays_once() {
    let h = Harness::new();
    let round = h.open((5, 2)).await;
    h.controller.place_wager("alice", 10, Side::Jackpot).await.unwrap();
    h.controller.place_wager("bob", 10, Side::NonJackpot).await.unwrap();

    let first = h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(first.settled, 2);
    let second = h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(second.settled, 0);

    assert_eq!(h.balance("alice").await, 160);
    assert_eq!(h.balance("bob").await, 90);

    let stored = h.controller.store().get_round(round.id).await.unwrap().unwrap();
    assert_eq!(stored.state, RoundState::Resolved);
    assert!(stored.resolved_at.is_some());
}

#[tokio::test]
async fn test_placement_during_resolution_is_closed() {
    let h = Harness::new();
    let round = h.open((2, 3)).await;
    h.controller.resolve_round(round.id).await.unwrap();

    // between resolution and the next round there is nothing to bet on
    assert!(matches!(
        h.controller.place_wager("alice", 5, Side::Jackpot).await,
        Err(WagerError::NoActiveRound)
    ));
}

#[tokio::test]
async fn test_recent_rolls_and_leaderboard_queries() {
    let h = Harness::new();
    for roll in [(3, 4), (2, 2), (4, 3), (1, 1), (6, 6), (5, 5)] {
        let round = h.open(roll).await;
        h.controller.place_wager("alice", 1, Side::NonJackpot).await.unwrap();
        h.controller.resolve_round(round.id).await.unwrap();
    }

    let rolls = h.controller.recent_rolls("alice").await.unwrap();
    assert_eq!(rolls.len(), 5);
    // newest first: (5,5), (6,6), (1,1), (4,3), (2,2)
    let sums: Vec<u8> = rolls.iter().map(|r| r.dice_sum).collect();
    assert_eq!(sums, vec![10, 12, 2, 7, 4]);
    assert!(rolls.windows(2).all(|w| w[0].wager_id > w[1].wager_id));

    let board = h.controller.leaderboard().await.unwrap();
    let streaks: Vec<u32> = board.iter().map(|e| e.win_streak).collect();
    assert_eq!(streaks, vec![3, 2, 1, 1]);
    assert!(board.iter().all(|e| e.username == "Alice"));

    assert!(h.controller.recent_rolls("bob").await.unwrap().is_empty());
}

/// Store whose settlement commits fail for one user while `failures` > 0
struct FlakyStore {
    inner: MemoryStore,
    flaky_user: String,
    failures: AtomicU32,
}

#[async_trait]
impl AccountStore for FlakyStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StorageError> {
        self.inner.get_account(user_id).await
    }
    async fn put_account(&self, account: &Account) -> Result<(), StorageError> {
        self.inner.put_account(account).await
    }
    async fn credit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        self.inner.credit(user_id, amount).await
    }
    async fn debit(&self, user_id: &str, amount: u64) -> Result<u64, LedgerError> {
        self.inner.debit(user_id, amount).await
    }
}

#[async_trait]
impl RoundStore for FlakyStore {
    async fn create_round(
        &self,
        created_at: DateTime<Utc>,
        roll_time: DateTime<Utc>,
        dice: (u8, u8),
    ) -> Result<Round, StorageError> {
        self.inner.create_round(created_at, roll_time, dice).await
    }
    async fn get_round(&self, round_id: RoundId) -> Result<Option<Round>, StorageError> {
        self.inner.get_round(round_id).await
    }
    async fn update_round(&self, round: &Round) -> Result<(), StorageError> {
        self.inner.update_round(round).await
    }
    async fn unresolved_rounds(&self) -> Result<Vec<Round>, StorageError> {
        self.inner.unresolved_rounds().await
    }
}

#[async_trait]
impl WagerStore for FlakyStore {
    async fn get_wager(&self, wager_id: WagerId) -> Result<Option<Wager>, StorageError> {
        self.inner.get_wager(wager_id).await
    }
    async fn wagers_for_round(&self, round_id: RoundId) -> Result<Vec<Wager>, StorageError> {
        self.inner.wagers_for_round(round_id).await
    }
    async fn wagers_for_user(
        &self,
        user_id: &str,
        limit: usize,
        settled_only: bool,
    ) -> Result<Vec<Wager>, StorageError> {
        self.inner.wagers_for_user(user_id, limit, settled_only).await
    }
    async fn last_settled_before(
        &self,
        user_id: &str,
        before: WagerId,
    ) -> Result<Option<Wager>, StorageError> {
        self.inner.last_settled_before(user_id, before).await
    }
    async fn top_streaks(&self, limit: usize) -> Result<Vec<Wager>, StorageError> {
        self.inner.top_streaks(limit).await
    }
}

#[async_trait]
impl GameStore for FlakyStore {
    async fn commit_placement(&self, wager: NewWager) -> Result<(Wager, u64), LedgerError> {
        self.inner.commit_placement(wager).await
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<SettlementCommit, LedgerError> {
        if settlement.user_id == self.flaky_user {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(LedgerError::Storage(StorageError::WriteFailed(
                    "injected failure".to_string(),
                )));
            }
        }
        self.inner.commit_settlement(settlement).await
    }
}

fn flaky_harness(failures: u32, retry_attempts: u32) -> (Harness, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::with_accounts(demo_accounts()),
        flaky_user: "bob".to_string(),
        failures: AtomicU32::new(failures),
    });
    let config = RoundConfig {
        settlement_retry_attempts: retry_attempts,
        settlement_retry_backoff_ms: 1,
        ..Default::default()
    };
    (Harness::with_store_and_config(store.clone(), config), store)
}

#[tokio::test]
async fn test_failed_settlement_is_retried_within_round() {
    let (h, _) = flaky_harness(2, 3);
    let round = h.open((3, 4)).await;
    h.controller.place_wager("alice", 10, Side::Jackpot).await.unwrap();
    h.controller.place_wager("bob", 10, Side::Jackpot).await.unwrap();

    let report = h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(report.settled, 2);
    assert!(report.is_complete());
    assert_eq!(h.balance("bob").await, 160);
    assert_eq!(h.controller.metrics().settlement_failures(), 2);
}

#[tokio::test]
async fn test_persistent_failure_is_isolated_and_swept_later() {
    let (h, store) = flaky_harness(10, 1);
    let round = h.open((3, 4)).await;
    h.controller.place_wager("alice", 10, Side::Jackpot).await.unwrap();
    let bob = h.controller.place_wager("bob", 10, Side::Jackpot).await.unwrap();

    let report = h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.pending, 1);

    // alice is paid, bob's wager is left Pending and the round stays Locked
    assert_eq!(h.balance("alice").await, 160);
    assert_eq!(h.balance("bob").await, 90);
    let stored = h.controller.store().get_round(round.id).await.unwrap().unwrap();
    assert_eq!(stored.state, RoundState::Locked);
    assert!(h.controller.store().get_wager(bob.id).await.unwrap().unwrap().is_pending());

    store.failures.store(0, Ordering::SeqCst);
    assert_eq!(h.controller.finalize_unresolved_rounds().await.unwrap(), 0);
    assert_eq!(h.balance("bob").await, 160);
    assert_eq!(h.balance("alice").await, 160);
    let stored = h.controller.store().get_round(round.id).await.unwrap().unwrap();
    assert_eq!(stored.state, RoundState::Resolved);
}

#[tokio::test]
async fn test_retry_keeps_streaks_in_placement_order() {
    let (h, _) = flaky_harness(1, 1);
    let round = h.open((3, 4)).await;
    let first = h.controller.place_wager("bob", 10, Side::Jackpot).await.unwrap();
    let second = h.controller.place_wager("bob", 10, Side::Jackpot).await.unwrap();

    let report = h.controller.resolve_round(round.id).await.unwrap();
    assert_eq!(report.settled, 2);
    assert!(report.is_complete());
    assert_eq!(h.controller.metrics().settlement_failures(), 1);

    let store = h.controller.store();
    assert_eq!(store.get_wager(first.id).await.unwrap().unwrap().win_streak, 1);
    assert_eq!(store.get_wager(second.id).await.unwrap().unwrap().win_streak, 2);
    assert_eq!(h.balance("bob").await, 220);
}

#[tokio::test]
async fn test_sweep_holds_later_rounds_behind_unsettled_wager() {
    let (h, store) = flaky_harness(1, 0);
    let now = Utc::now();
    let mut wagers = Vec::new();
    for _ in 0..2 {
        let round = store.inner.create_round(now, now, (3, 4)).await.unwrap();
        let (wager, _) = store
            .commit_placement(NewWager {
                user_id: "bob".to_string(),
                round_id: round.id,
                amount: 10,
                side: Side::Jackpot,
                created_at: now,
            })
            .await
            .unwrap();
        wagers.push(wager);
    }

    // the first round's failure keeps bob's wager in the second round waiting
    assert_eq!(h.controller.finalize_unresolved_rounds().await.unwrap(), 2);
    assert!(store.get_wager(wagers[1].id).await.unwrap().unwrap().is_pending());

    assert_eq!(h.controller.finalize_unresolved_rounds().await.unwrap(), 0);
    assert_eq!(store.get_wager(wagers[0].id).await.unwrap().unwrap().win_streak, 1);
    assert_eq!(store.get_wager(wagers[1].id).await.unwrap().unwrap().win_streak, 2);
    assert_eq!(h.balance("bob").await, 220);
}

async fn wait_for_round(controller: &RoundController) -> Round {
    for _ in 0..100 {
        if let Some(round) = controller.current_round().await {
            return round;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("scheduler never opened a round");
}

#[tokio::test]
async fn test_scheduler_waits_for_pending_wagers_before_next_round() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::with_accounts(demo_accounts()),
        flaky_user: "bob".to_string(),
        failures: AtomicU32::new(u32::MAX),
    });
    let config = RoundConfig {
        round_interval_ms: 200,
        wager_cutoff_ms: 50,
        settlement_retry_attempts: 0,
        settlement_retry_backoff_ms: 1,
        cycle_restart_backoff_ms: 20,
        ..Default::default()
    };
    let controller = RoundController::builder(store.clone(), Arc::new(NullNotifier))
        .dice(Arc::new(ScriptedDice::new([]).with_fallback((3, 4))))
        .config(config)
        .build();

    controller.start().await;
    let first = wait_for_round(&controller).await;
    let wager = controller.place_wager("bob", 10, Side::Jackpot).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let current = controller.current_round().await.unwrap();
    assert_eq!(current.id, first.id);
    assert_eq!(current.state, RoundState::Locked);
    assert_eq!(controller.store().unresolved_rounds().await.unwrap().len(), 1);
    assert!(controller.metrics().cycle_failures() > 0);
    assert!(controller.metrics().consecutive_cycle_failures() > 0);
    assert!(matches!(
        controller.place_wager("alice", 10, Side::Jackpot).await,
        Err(WagerError::BettingClosed)
    ));

    store.failures.store(0, Ordering::SeqCst);
    let mut waited = 0;
    while (controller.metrics().rounds_resolved() < 2
        || controller.metrics().consecutive_cycle_failures() > 0)
        && waited < 200
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    controller.shutdown().await;

    assert!(controller.metrics().rounds_resolved() >= 2);
    assert_eq!(controller.metrics().consecutive_cycle_failures(), 0);
    let settled = controller.store().get_wager(wager.id).await.unwrap().unwrap();
    assert_eq!(settled.outcome, WagerOutcome::Won);
    assert_eq!(controller.ledger().balance("bob").await.unwrap(), 160);
    let stored = controller.store().get_round(first.id).await.unwrap().unwrap();
    assert_eq!(stored.state, RoundState::Resolved);
}

#[tokio::test]
async fn test_scheduler_cycles_rounds() {
    let store = Arc::new(MemoryStore::with_accounts(demo_accounts()));
    let config = RoundConfig {
        round_interval_ms: 200,
        wager_cutoff_ms: 50,
        settlement_retry_backoff_ms: 5,
        cycle_restart_backoff_ms: 20,
        ..Default::default()
    };
    let controller = RoundController::builder(store, Arc::new(NullNotifier))
        .dice(Arc::new(ScriptedDice::new([]).with_fallback((3, 4))))
        .config(config)
        .build();

    controller.start().await;
    // a second start replaces the first loop instead of running two
    controller.start().await;
    assert!(controller.is_running().await);

    let mut waited = 0;
    while controller.current_round().await.is_none() && waited < 100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += 1;
    }
    let wager = controller.place_wager("alice", 10, Side::Jackpot).await.unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    controller.shutdown().await;
    assert!(!controller.is_running().await);

    let settled = controller.store().get_wager(wager.id).await.unwrap().unwrap();
    assert_eq!(settled.outcome, WagerOutcome::Won);
    assert_eq!(controller.ledger().balance("alice").await.unwrap(), 160);
    assert!(controller.metrics().rounds_resolved() >= 2);

    // never more than the one round that was live at shutdown is unresolved
    assert!(controller.store().unresolved_rounds().await.unwrap().len() <= 1);
}
