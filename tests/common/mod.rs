#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use lucky7::{
    config::RoundConfig,
    game::{types::Account, GameStore, ManualClock, MemoryStore, RoundController, ScriptedDice},
    notifications::{GameEvent, Notifier},
};
use std::sync::{Arc, Mutex};

/// Notifier that keeps every event for inspection
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(Option<String>, GameEvent)>>,
}

impl RecordingNotifier {
    pub fn for_user(&self, user_id: &str) -> Vec<GameEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| target.as_deref() == Some(user_id))
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<GameEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| target.is_none())
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn send_to_user(&self, user_id: &str, event: GameEvent) {
        self.events
            .lock()
            .unwrap()
            .push((Some(user_id.to_string()), event));
    }

    fn broadcast(&self, event: GameEvent) {
        self.events.lock().unwrap().push((None, event));
    }
}

pub fn demo_accounts() -> Vec<Account> {
    vec![
        Account::new("alice", "Alice", 100),
        Account::new("bob", "Bob", 100),
    ]
}

pub fn fixed_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap())
}

pub struct Harness {
    pub controller: Arc<RoundController>,
    pub clock: ManualClock,
    pub dice: ScriptedDice,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::with_accounts(demo_accounts())))
    }

    pub fn with_store(store: Arc<dyn GameStore>) -> Self {
        Self::with_store_and_config(store, RoundConfig::default())
    }

    pub fn with_store_and_config(store: Arc<dyn GameStore>, config: RoundConfig) -> Self {
        let clock = fixed_clock();
        let dice = ScriptedDice::new([]);
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = RoundController::builder(store, notifier.clone())
            .clock(Arc::new(clock.clone()))
            .dice(Arc::new(dice.clone()))
            .config(config)
            .build();
        Self {
            controller,
            clock,
            dice,
            notifier,
        }
    }

    /// Open a round whose dice are `roll`
    pub async fn open(&self, roll: (u8, u8)) -> lucky7::game::Round {
        self.dice.push(roll);
        self.controller.open_round().await.expect("open round")
    }

    pub async fn balance(&self, user_id: &str) -> u64 {
        self.controller.ledger().balance(user_id).await.expect("balance")
    }
}
