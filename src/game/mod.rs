//! Lucky 7 round engine
//!
//! Rounds, wagers, balances and the controller that cycles them.

pub mod clock;
pub mod controller;
pub mod dice;
pub mod leaderboard;
pub mod ledger;
pub mod memory_store;
pub mod rocks_store;
pub mod settlement;
pub mod store;
pub mod streak;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::{ResolutionReport, RoundController, RoundControllerBuilder};
pub use dice::{DiceRoller, RandomDice, ScriptedDice};
pub use ledger::TokenLedger;
pub use memory_store::MemoryStore;
pub use rocks_store::RocksStore;
pub use store::{AccountStore, GameStore, RoundStore, WagerStore};
pub use types::*;
