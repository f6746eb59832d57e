//! Lucky 7 - timed pari-mutuel dice rounds
//!
//! Every round pre-rolls two dice and takes wagers on whether they sum to 7
//! until a cutoff before the roll. At roll time each wager is settled, the
//! owner's balance and win streak are updated, and results are pushed to
//! connected clients.

pub mod api;
pub mod config;
pub mod errors;
pub mod game;
pub mod metrics;
pub mod notifications;
pub mod storage;

pub use config::{ConfigLoader, GameConfig, RoundConfig, StorageBackend};
pub use errors::{
    ConfigurationError, LedgerError, Lucky7Error, Lucky7Result, StorageError, WagerError,
};
pub use game::{RoundController, Side};
pub use metrics::GameMetrics;
pub use notifications::{GameEvent, Notifier, SessionRegistry};
pub use storage::OptimizedStorage;
