//! Configuration management with validation and defaults
//!
//! Defaults are overridden by an optional TOML file and then by `LUCKY7_*`
//! environment variables; the result is validated before use.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};

/// Complete service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub round: RoundConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

/// Round timing and settlement tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Time from round creation to the roll
    pub round_interval_ms: u64,
    /// Trailing window before the roll in which wagers are rejected
    pub wager_cutoff_ms: u64,
    pub leaderboard_size: usize,
    pub recent_rolls_limit: usize,
    /// Extra passes over wagers that failed to settle within one resolution
    pub settlement_retry_attempts: u32,
    pub settlement_retry_backoff_ms: u64,
    /// Delay before the scheduler retries after failing to open a round
    pub cycle_restart_backoff_ms: u64,
    /// Payout multiple for a winning jackpot wager
    pub jackpot_multiplier: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            round_interval_ms: 15_000,
            wager_cutoff_ms: 5_000,
            leaderboard_size: 10,
            recent_rolls_limit: 5,
            settlement_retry_attempts: 3,
            settlement_retry_backoff_ms: 250,
            cycle_restart_backoff_ms: 1_000,
            jackpot_multiplier: 7,
        }
    }
}

impl RoundConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn cutoff(&self) -> Duration {
        Duration::from_millis(self.wager_cutoff_ms)
    }

    pub fn settlement_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.settlement_retry_backoff_ms)
    }

    pub fn cycle_restart_backoff(&self) -> Duration {
        Duration::from_millis(self.cycle_restart_backoff_ms)
    }
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    RocksDb,
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_directory: String,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::RocksDb,
            data_directory: "./DB/lucky7_data".to_string(),
            clear_on_start: false,
        }
    }
}

/// Logging and keep-alive configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
    pub heartbeat_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "lucky7=info,tower_http=info".to_string(),
            heartbeat_interval_secs: 30,
        }
    }
}

impl GameConfig {
    /// Persistent deployment with the default round timing
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::RocksDb,
                clear_on_start: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// In-memory storage with short rounds for tests and local runs
    pub fn testing() -> Self {
        Self {
            round: RoundConfig {
                round_interval_ms: 300,
                wager_cutoff_ms: 100,
                settlement_retry_backoff_ms: 10,
                cycle_restart_backoff_ms: 50,
                ..Default::default()
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                clear_on_start: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.round.round_interval_ms == 0 {
            return Err(invalid("round.round_interval_ms", "0", "must be > 0"));
        }

        if self.round.wager_cutoff_ms >= self.round.round_interval_ms {
            return Err(ConfigurationError::LogicalInconsistency(format!(
                "wager_cutoff_ms ({}) must be shorter than round_interval_ms ({})",
                self.round.wager_cutoff_ms, self.round.round_interval_ms
            )));
        }

        if self.round.leaderboard_size == 0 {
            return Err(invalid("round.leaderboard_size", "0", "must be > 0"));
        }

        if self.round.recent_rolls_limit == 0 {
            return Err(invalid("round.recent_rolls_limit", "0", "must be > 0"));
        }

        if self.round.jackpot_multiplier == 0 {
            return Err(invalid("round.jackpot_multiplier", "0", "must be > 0"));
        }

        if self.monitoring.heartbeat_interval_secs == 0 {
            return Err(invalid("monitoring.heartbeat_interval_secs", "0", "must be > 0"));
        }

        if self.api.port == 0 {
            return Err(invalid("api.port", "0", "must be a valid TCP port"));
        }

        if self.storage.backend == StorageBackend::RocksDb && self.storage.data_directory.is_empty() {
            return Err(invalid(
                "storage.data_directory",
                "",
                "required for the rocksdb backend",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
    base: Option<GameConfig>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            base: None,
        }
    }

    /// Start from a preset instead of the defaults when no file is given
    pub fn with_base(mut self, base: GameConfig) -> Self {
        self.base = Some(base);
        self
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> Result<GameConfig, ConfigurationError> {
        let mut config = match self.config_path {
            Some(ref path) => Self::load_from_file(path)?,
            None => self.base.clone().unwrap_or_default(),
        };

        Self::apply_env_overrides(&mut config, |key| env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML file
    fn load_from_file(path: &str) -> Result<GameConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        parse_toml(&content)
    }

    fn apply_env_overrides<F>(config: &mut GameConfig, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("LUCKY7_ROUND_INTERVAL_MS") {
            config.round.round_interval_ms = parse_env("LUCKY7_ROUND_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("LUCKY7_WAGER_CUTOFF_MS") {
            config.round.wager_cutoff_ms = parse_env("LUCKY7_WAGER_CUTOFF_MS", &value)?;
        }
        if let Some(host) = lookup("LUCKY7_API_HOST") {
            config.api.host = host;
        }
        if let Some(value) = lookup("LUCKY7_API_PORT") {
            config.api.port = parse_env("LUCKY7_API_PORT", &value)?;
        }
        if let Some(origins) = lookup("LUCKY7_ALLOWED_ORIGINS") {
            config.api.allowed_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(dir) = lookup("LUCKY7_DATA_DIR") {
            config.storage.data_directory = dir;
        }
        if let Some(filter) = lookup("LUCKY7_LOG_FILTER") {
            config.monitoring.log_filter = filter;
        }
        Ok(())
    }
}

/// Parse a TOML document into a configuration; missing fields take defaults
pub fn parse_toml(content: &str) -> Result<GameConfig, ConfigurationError> {
    toml::from_str(content)
        .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigurationError> {
    value.parse::<T>().map_err(|_| invalid(key, value, "not a valid number"))
}
