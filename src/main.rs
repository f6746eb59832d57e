//! Lucky 7 game server
//!
//! Loads configuration, opens the store, starts the round scheduler and
//! serves the HTTP/WebSocket API until shutdown.

use clap::{Parser, ValueEnum};
use lucky7::{
    api::{websocket::spawn_heartbeat, ApiServer, AppState},
    config::{ConfigLoader, GameConfig, StorageBackend},
    errors::Lucky7Result,
    game::{
        types::Account, AccountStore, GameStore, MemoryStore, RocksStore, RoundController,
    },
    metrics::GameMetrics,
    notifications::SessionRegistry,
    storage::OptimizedStorage,
};
use std::{sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Built-in configuration presets
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Profile {
    #[default]
    Default,
    Production,
    Testing,
}

impl Profile {
    fn base(self) -> GameConfig {
        match self {
            Profile::Default => GameConfig::default(),
            Profile::Production => GameConfig::production(),
            Profile::Testing => GameConfig::testing(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "lucky7-server")]
#[command(about = "Lucky 7 dice round server", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Preset used when no configuration file is given
    #[arg(long, value_enum, default_value_t = Profile::Default)]
    profile: Profile,

    /// API server host
    #[arg(long)]
    host: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// RocksDB data directory
    #[arg(long)]
    db_path: Option<String>,

    /// Keep all state in memory
    #[arg(long)]
    memory: bool,

    /// Create Alice, Bob and Charlie with 100 tokens each if missing
    #[arg(long)]
    seed_demo_accounts: bool,
}

fn load_config(args: &Args) -> Lucky7Result<GameConfig> {
    let loader = match &args.config {
        Some(path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new().with_base(args.profile.base()),
    };
    let mut config = loader.load()?;

    if let Some(host) = &args.host {
        config.api.host = host.clone();
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(path) = &args.db_path {
        config.storage.data_directory = path.clone();
        config.storage.backend = StorageBackend::RocksDb;
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(config: &GameConfig) -> Lucky7Result<Arc<dyn GameStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("🧠 Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::RocksDb => {
            let dir = &config.storage.data_directory;
            info!("📂 Opening RocksDB store: {}", dir);
            let storage = if config.storage.clear_on_start {
                OptimizedStorage::new_cleared(dir)?
            } else {
                OptimizedStorage::new(dir)?
            };
            Ok(Arc::new(RocksStore::new(storage)))
        }
    }
}

async fn seed_demo_accounts(store: &dyn GameStore) -> Lucky7Result<()> {
    for (user_id, name) in [("alice", "Alice"), ("bob", "Bob"), ("charlie", "Charlie")] {
        if store.get_account(user_id).await?.is_none() {
            store.put_account(&Account::new(user_id, name, 100)).await?;
            info!(user_id, "Seeded demo account");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Lucky7Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_filter)),
        )
        .init();

    info!("🚀 Starting Lucky 7 server v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config)?;
    if args.seed_demo_accounts {
        seed_demo_accounts(store.as_ref()).await?;
    }

    let metrics = Arc::new(GameMetrics::new());
    let sessions = Arc::new(SessionRegistry::new().with_metrics(metrics.clone()));

    let controller = RoundController::builder(store, sessions.clone())
        .config(config.round.clone())
        .metrics(metrics)
        .build();
    controller.start().await;

    let heartbeat = spawn_heartbeat(
        sessions.clone(),
        Duration::from_secs(config.monitoring.heartbeat_interval_secs),
    );

    let state = Arc::new(AppState::new(controller, sessions));
    let result = ApiServer::new(config.api.clone(), state).run().await;

    heartbeat.abort();
    result
}
