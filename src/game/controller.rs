//! Round cycle controller
//!
//! Owns the current round and the single scheduler task that drives the
//! cycle: sweep unresolved rounds, open a round, sleep until its roll time,
//! resolve it, repeat.
//!
//! Placement and resolution are serialized through the `current` lock.
//! Placement holds a read guard while it checks the round and records the
//! wager; resolution takes the write guard to flip the round to `Locked`
//! before it reads the round's wagers. A wager is therefore either recorded
//! before resolution starts or rejected with `BettingClosed`.

use crate::{
    config::RoundConfig,
    errors::{Lucky7Error, Lucky7Result, StorageError, WagerError},
    game::{
        clock::{Clock, SystemClock},
        dice::{DiceRoller, RandomDice},
        leaderboard,
        ledger::TokenLedger,
        settlement::WagerResolver,
        store::GameStore,
        types::{
            GameStatus, LeaderboardEntry, NewWager, RecentRoll, Round, RoundId, RoundState,
            SettlementCommit, Side, UserId, Wager,
        },
    },
    metrics::GameMetrics,
    notifications::{GameEvent, Notifier},
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{watch, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Summary of one `resolve_round` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub round_id: RoundId,
    /// Wagers settled by this call
    pub settled: usize,
    /// Wagers that were already terminal
    pub already_settled: usize,
    /// Wagers still Pending after all retries
    pub pending: usize,
}

impl ResolutionReport {
    pub fn is_complete(&self) -> bool {
        self.pending == 0
    }
}

struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Round scheduler task ended abnormally: {}", e);
        }
    }
}

pub struct RoundControllerBuilder {
    store: Arc<dyn GameStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    dice: Arc<dyn DiceRoller>,
    config: RoundConfig,
    metrics: Arc<GameMetrics>,
}

impl RoundControllerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dice(mut self, dice: Arc<dyn DiceRoller>) -> Self {
        self.dice = dice;
        self
    }

    pub fn config(mut self, config: RoundConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<GameMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Arc<RoundController> {
        Arc::new(RoundController {
            ledger: TokenLedger::new(self.store.clone(), self.notifier.clone()),
            resolver: WagerResolver::new(self.config.jackpot_multiplier),
            store: self.store,
            notifier: self.notifier,
            clock: self.clock,
            dice: self.dice,
            config: self.config,
            metrics: self.metrics,
            current: RwLock::new(None),
            scheduler: Mutex::new(None),
        })
    }
}

pub struct RoundController {
    store: Arc<dyn GameStore>,
    ledger: TokenLedger,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    dice: Arc<dyn DiceRoller>,
    config: RoundConfig,
    resolver: WagerResolver,
    metrics: Arc<GameMetrics>,
    current: RwLock<Option<Round>>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl RoundController {
    pub fn builder(store: Arc<dyn GameStore>, notifier: Arc<dyn Notifier>) -> RoundControllerBuilder {
        RoundControllerBuilder {
            store,
            notifier,
            clock: Arc::new(SystemClock),
            dice: Arc::new(RandomDice),
            config: RoundConfig::default(),
            metrics: Arc::new(GameMetrics::new()),
        }
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<GameMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub async fn current_round(&self) -> Option<Round> {
        self.current.read().await.clone()
    }

    /// Create a new Open round with pre-rolled dice and make it current.
    ///
    /// Fails while the current round is not yet Resolved.
    pub async fn open_round(&self) -> Lucky7Result<Round> {
        let mut current = self.current.write().await;
        if let Some(live) = current.as_ref().filter(|r| !r.is_resolved()) {
            return Err(Lucky7Error::Cycle(format!(
                "round {} is still {}",
                live.id, live.state
            )));
        }

        let now = self.clock.now();
        let interval = chrono::Duration::milliseconds(
            i64::try_from(self.config.round_interval_ms).unwrap_or(i64::MAX),
        );
        let roll_time = now
            .checked_add_signed(interval)
            .ok_or_else(|| Lucky7Error::Cycle("round interval overflows the clock".to_string()))?;
        let dice = self.dice.roll();

        let round = self.store.create_round(now, roll_time, dice).await?;
        *current = Some(round.clone());
        drop(current);
        self.metrics.record_round_opened();

        info!(
            round_id = round.id,
            roll_time = %round.roll_time,
            "🎲 Round opened"
        );
        Ok(round)
    }

    /// Place a wager on the current round.
    ///
    /// Checks run in order: active round, cutoff, amount, account, balance.
    pub async fn place_wager(
        &self,
        user_id: &str,
        amount: i64,
        side: Side,
    ) -> Result<Wager, WagerError> {
        let result = self.try_place_wager(user_id, amount, side).await;
        match &result {
            Ok(wager) => {
                self.metrics.record_wager_placed(wager.amount);
                info!(
                    wager_id = wager.id,
                    round_id = wager.round_id,
                    user_id,
                    amount = wager.amount,
                    side = %side,
                    "Wager placed"
                );
            }
            Err(e) => {
                self.metrics.record_wager_rejected();
                debug!(user_id, amount, error = %e, "Wager rejected");
            }
        }
        result
    }

    async fn try_place_wager(
        &self,
        user_id: &str,
        amount: i64,
        side: Side,
    ) -> Result<Wager, WagerError> {
        // Held until the wager is recorded so resolution cannot start in between
        let current = self.current.read().await;
        let round = match current.as_ref() {
            Some(round) if round.state != RoundState::Resolved => round,
            _ => return Err(WagerError::NoActiveRound),
        };

        let now = self.clock.now();
        if round.phase(now, self.config.cutoff()) != RoundState::Open {
            return Err(WagerError::BettingClosed);
        }

        let amount = match u64::try_from(amount) {
            Ok(amount) if amount > 0 => amount,
            _ => return Err(WagerError::InvalidAmount),
        };

        let wager = self
            .ledger
            .place(NewWager {
                user_id: user_id.to_string(),
                round_id: round.id,
                amount,
                side,
                created_at: now,
            })
            .await?;
        Ok(wager)
    }

    /// Snapshot of the current round, or `None` before the first round opens
    pub async fn status(&self) -> Option<GameStatus> {
        let current = self.current.read().await;
        let round = current.as_ref()?;
        let now = self.clock.now();
        let remaining = round.time_remaining(now);

        Some(GameStatus {
            round_id: round.id,
            time_until_next_roll: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
            is_wagering_allowed: round.accepts_wagers(now, self.config.cutoff()),
        })
    }

    /// Last settled wagers of a user joined with their rounds, newest first
    pub async fn recent_rolls(&self, user_id: &str) -> Result<Vec<RecentRoll>, StorageError> {
        let wagers = self
            .store
            .wagers_for_user(user_id, self.config.recent_rolls_limit, true)
            .await?;

        let mut rounds: HashMap<RoundId, Round> = HashMap::new();
        let mut rolls = Vec::with_capacity(wagers.len());
        for wager in &wagers {
            if !rounds.contains_key(&wager.round_id) {
                match self.store.get_round(wager.round_id).await? {
                    Some(round) => {
                        rounds.insert(round.id, round);
                    }
                    None => {
                        warn!(wager_id = wager.id, round_id = wager.round_id, "Wager references missing round");
                        continue;
                    }
                }
            }
            if let Some(round) = rounds.get(&wager.round_id) {
                rolls.push(RecentRoll::from_parts(wager, round));
            }
        }
        Ok(rolls)
    }

    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>, StorageError> {
        leaderboard::top_streaks(self.store.as_ref(), self.config.leaderboard_size).await
    }

    /// Settle every Pending wager of a round with its stored dice.
    ///
    /// Safe to call repeatedly: terminal wagers are never paid again. The
    /// round is marked Resolved only once none of its wagers is Pending;
    /// otherwise it stays Locked for the next sweep.
    pub async fn resolve_round(&self, round_id: RoundId) -> Result<ResolutionReport, StorageError> {
        self.resolve_round_after(round_id, &mut HashSet::new()).await
    }

    /// Resolve a round, deferring every wager of a user in `held`.
    ///
    /// Streaks are computed from the user's previous settled wager, so once
    /// one of a user's wagers fails to settle, that user's later wagers wait
    /// for it. Users left with Pending wagers are added to `held`.
    async fn resolve_round_after(
        &self,
        round_id: RoundId,
        held: &mut HashSet<UserId>,
    ) -> Result<ResolutionReport, StorageError> {
        let mut report = ResolutionReport {
            round_id,
            ..Default::default()
        };

        let mut round = self.store.get_round(round_id).await?.ok_or_else(|| {
            StorageError::CorruptedData(format!("round {} not found", round_id))
        })?;
        if round.is_resolved() {
            debug!(round_id, "Round already resolved");
            return Ok(report);
        }

        // Close betting: waits for in-flight placements on this round
        {
            let mut current = self.current.write().await;
            if let Some(live) = current.as_mut().filter(|r| r.id == round_id) {
                live.state = RoundState::Locked;
            }
        }
        if round.state == RoundState::Open {
            round.state = RoundState::Locked;
            self.store.update_round(&round).await?;
        }

        let mut pending: Vec<Wager> = Vec::new();
        for wager in self.store.wagers_for_round(round_id).await? {
            if wager.is_pending() {
                pending.push(wager);
            } else {
                report.already_settled += 1;
            }
        }
        pending.sort_by_key(|w| w.id);

        info!(
            round_id,
            dice1 = round.dice1,
            dice2 = round.dice2,
            jackpot = round.is_jackpot,
            wagers = pending.len(),
            "Resolving round"
        );

        let mut attempt = 0;
        loop {
            let mut failed = Vec::new();
            let mut stalled: HashSet<UserId> = HashSet::new();
            for wager in pending {
                if held.contains(&wager.user_id) || stalled.contains(&wager.user_id) {
                    failed.push(wager);
                    continue;
                }
                match self.settle_wager(&wager, &round).await {
                    Ok(true) => report.settled += 1,
                    Ok(false) => report.already_settled += 1,
                    Err(e) => {
                        self.metrics.record_settlement_failure();
                        error!(
                            round_id,
                            wager_id = wager.id,
                            user_id = %wager.user_id,
                            attempt,
                            "Failed to settle wager: {}",
                            e
                        );
                        stalled.insert(wager.user_id.clone());
                        failed.push(wager);
                    }
                }
            }
            pending = failed;

            let retryable = pending.iter().any(|w| !held.contains(&w.user_id));
            if !retryable || attempt >= self.config.settlement_retry_attempts {
                break;
            }
            attempt += 1;
            tokio::time::sleep(self.config.settlement_retry_backoff()).await;
        }

        report.pending = pending.len();
        held.extend(pending.into_iter().map(|w| w.user_id));
        if !report.is_complete() {
            warn!(
                round_id,
                pending = report.pending,
                "Round left Locked with unsettled wagers"
            );
            return Ok(report);
        }

        round.state = RoundState::Resolved;
        round.resolved_at = Some(self.clock.now());
        self.store.update_round(&round).await?;
        {
            let mut current = self.current.write().await;
            if let Some(live) = current.as_mut().filter(|r| r.id == round_id) {
                *live = round.clone();
            }
        }
        self.metrics.record_round_resolved();

        match self.leaderboard().await {
            Ok(entries) => self.notifier.broadcast(GameEvent::WinStreaks { entries }),
            Err(e) => warn!(round_id, "Failed to refresh leaderboard: {}", e),
        }

        info!(
            round_id,
            settled = report.settled,
            "✅ Round resolved"
        );
        Ok(report)
    }

    /// Settle one wager and push its outcome to the owner.
    ///
    /// Returns false when the wager had already been settled.
    async fn settle_wager(&self, wager: &Wager, round: &Round) -> Result<bool, Lucky7Error> {
        let settlement = self
            .resolver
            .settle(self.store.as_ref(), wager, round, self.clock.now())
            .await?;

        let settled = match self.ledger.settle(&settlement).await? {
            SettlementCommit::Applied { wager, .. } => wager,
            SettlementCommit::AlreadySettled(_) => return Ok(false),
        };

        self.metrics
            .record_settlement(settled.is_win(), settled.payout);
        debug!(
            wager_id = settled.id,
            user_id = %settled.user_id,
            outcome = ?settled.outcome,
            payout = settled.payout,
            win_streak = settled.win_streak,
            "Wager settled"
        );

        self.notifier.send_to_user(
            &settled.user_id,
            GameEvent::RollResult {
                won: settled.is_win(),
                winnings: settled.payout,
                dice_sum: round.dice_sum(),
            },
        );
        match self.recent_rolls(&settled.user_id).await {
            Ok(rolls) => self
                .notifier
                .send_to_user(&settled.user_id, GameEvent::RecentRolls { rolls }),
            Err(e) => warn!(user_id = %settled.user_id, "Failed to load recent rolls: {}", e),
        }
        Ok(true)
    }

    /// Resolve every round left Open or Locked, except a live Open current round.
    ///
    /// Returns how many rounds still have Pending wagers afterwards.
    pub async fn finalize_unresolved_rounds(&self) -> Result<usize, StorageError> {
        let live_open = self
            .current
            .read()
            .await
            .as_ref()
            .filter(|r| r.state == RoundState::Open)
            .map(|r| r.id);
        self.sweep_unresolved(live_open).await
    }

    async fn sweep_unresolved(&self, skip: Option<RoundId>) -> Result<usize, StorageError> {
        let mut leftover = 0;
        let mut held = HashSet::new();
        for round in self.store.unresolved_rounds().await? {
            if Some(round.id) == skip {
                continue;
            }
            info!(round_id = round.id, state = %round.state, "Finalizing unresolved round");
            if !self.resolve_round_after(round.id, &mut held).await?.is_complete() {
                leftover += 1;
            }
        }
        Ok(leftover)
    }

    /// One full cycle. Returns false if shutdown was requested while waiting for the roll.
    ///
    /// Any round still unresolved at this point was abandoned by a previous
    /// process or scheduler, so none is skipped.
    async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Lucky7Result<bool> {
        let leftover = self.sweep_unresolved(None).await?;
        if leftover > 0 {
            return Err(Lucky7Error::Cycle(format!(
                "{} earlier round(s) still have pending wagers",
                leftover
            )));
        }

        let round = self.open_round().await?;
        let wait = round.time_remaining(self.clock.now());
        if wait_or_shutdown(shutdown, wait).await {
            info!(round_id = round.id, "Shutdown requested; round will be finalized on restart");
            return Ok(false);
        }

        self.resolve_round(round.id).await?;
        Ok(true)
    }

    async fn run_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.round_interval_ms,
            cutoff_ms = self.config.wager_cutoff_ms,
            "🚀 Round scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_cycle(&mut shutdown).await {
                Ok(true) => self.metrics.record_cycle_success(),
                Ok(false) => break,
                Err(e) => {
                    let consecutive = self.metrics.record_cycle_failure();
                    error!(consecutive, "Round cycle failed, restarting: {}", e);
                    if consecutive % STALL_WARNING_EVERY == 0 {
                        warn!(
                            consecutive,
                            "⚠️ Round scheduler stalled: no round can open until earlier wagers settle"
                        );
                    }
                    if wait_or_shutdown(&mut shutdown, self.config.cycle_restart_backoff()).await {
                        break;
                    }
                }
            }
        }

        info!("🛑 Round scheduler stopped");
    }

    /// Start the scheduler, replacing any running one
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.scheduler.lock().await;
        if let Some(previous) = slot.take() {
            previous.stop().await;
        }

        let (tx, rx) = watch::channel(false);
        let controller = Arc::clone(self);
        let task = tokio::spawn(controller.run_scheduler(rx));
        *slot = Some(SchedulerHandle { shutdown: tx, task });
    }

    /// Stop the scheduler after any in-flight resolution completes
    pub async fn shutdown(&self) {
        if let Some(handle) = self.scheduler.lock().await.take() {
            handle.stop().await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }
}

/// Consecutive failed cycles between stall warnings
const STALL_WARNING_EVERY: u64 = 10;

/// Sleep for `delay`; true if shutdown was signalled first
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}
