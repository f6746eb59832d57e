//! Error types for the Lucky 7 round engine
//!
//! Layered error enums: storage failures sit at the bottom, ledger and wager
//! errors wrap them, and `Lucky7Error` is the root used at process boundaries.

use thiserror::Error;

/// Root error type for all Lucky 7 operations
#[derive(Debug, Error)]
pub enum Lucky7Error {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Storage system errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Token ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Wager placement errors
    #[error("Wager error: {0}")]
    Wager(#[from] WagerError),

    /// Round scheduling errors
    #[error("Round cycle error: {0}")]
    Cycle(String),
}

/// Configuration and validation errors
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration logical inconsistency: {0}")]
    LogicalInconsistency(String),
}

/// Storage system errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Token ledger errors
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Not enough tokens: balance {balance}, requested {requested}")]
    InsufficientBalance { balance: u64, requested: u64 },

    #[error("Crediting {amount} to {user_id} overflows balance {balance}")]
    BalanceOverflow {
        user_id: String,
        balance: u64,
        amount: u64,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Wager placement rejections.
///
/// Every variant except `Storage` is a recoverable, user-facing rejection;
/// its `Display` text is returned to the caller as the error message.
#[derive(Debug, Clone, Error)]
pub enum WagerError {
    #[error("No active game available")]
    NoActiveRound,

    #[error("Too late to place a wager for this roll")]
    BettingClosed,

    #[error("Invalid wager amount")]
    InvalidAmount,

    #[error("User not found")]
    UserNotFound,

    #[error("Not enough tokens")]
    InsufficientBalance,

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl WagerError {
    /// Whether the rejection was caused by the caller rather than the server
    pub fn is_user_error(&self) -> bool {
        !matches!(self, WagerError::Storage(_))
    }

    /// Stable machine-readable code for API payloads
    pub fn code(&self) -> &'static str {
        match self {
            WagerError::NoActiveRound => "NO_ACTIVE_ROUND",
            WagerError::BettingClosed => "BETTING_CLOSED",
            WagerError::InvalidAmount => "INVALID_AMOUNT",
            WagerError::UserNotFound => "USER_NOT_FOUND",
            WagerError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            WagerError::Storage(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<LedgerError> for WagerError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UserNotFound(_) => WagerError::UserNotFound,
            LedgerError::InsufficientBalance { .. } => WagerError::InsufficientBalance,
            LedgerError::Storage(e) => WagerError::Storage(e),
            e @ LedgerError::BalanceOverflow { .. } => {
                WagerError::Storage(StorageError::WriteFailed(e.to_string()))
            }
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::CorruptedData(e.to_string())
    }
}

impl From<std::io::Error> for Lucky7Error {
    fn from(e: std::io::Error) -> Self {
        Lucky7Error::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

// Convenience type alias for Results
pub type Lucky7Result<T> = Result<T, Lucky7Error>;
