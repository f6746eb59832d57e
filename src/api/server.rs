//! API Server
//!
//! Router assembly, middleware stack and graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, metrics_middleware, request_id_middleware},
    routes::create_router,
};
use crate::{config::ApiConfig, errors::Lucky7Error};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

/// Router with the full middleware stack
pub fn build_app(state: Arc<AppState>, config: &ApiConfig) -> axum::Router {
    create_router(state.clone())
        // Request ID middleware (first for tracing)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn_with_state(state, metrics_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(create_cors_layer(config.allowed_origins.clone()))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        // Tracing layer (last for complete request tracing)
        .layer(TraceLayer::new_for_http())
}

pub struct ApiServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until Ctrl+C or SIGTERM, then stop the round scheduler
    pub async fn run(self) -> Result<(), Lucky7Error> {
        let app = build_app(self.state.clone(), &self.config);
        let addr = self.socket_addr()?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("🌐 Lucky 7 server listening on http://{}", addr);
        self.log_server_info();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Stopping round scheduler");
        self.state.controller.shutdown().await;
        info!("🛑 Server stopped gracefully");
        Ok(())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Lucky7Error> {
        let ip = self.config.host.parse::<std::net::IpAddr>().map_err(|e| {
            crate::errors::ConfigurationError::InvalidValue {
                field: "api.host".to_string(),
                value: self.config.host.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }

    fn log_server_info(&self) {
        let round = self.state.controller.config();
        info!("📋 Server Configuration:");
        info!("   Version: {}", self.state.version);
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!(
            "   Round interval: {}ms, wager cutoff: {}ms",
            round.round_interval_ms, round.wager_cutoff_ms
        );

        info!("📊 Available endpoints:");
        info!("   GET  /api/health");
        info!("   POST /api/game/wagers");
        info!("   GET  /api/game/status");
        info!("   GET  /api/game/recent-rolls?userId=");
        info!("   GET  /api/game/win-streaks");
        info!("   GET  /api/users/:user_id/balance");
        info!("   GET  /ws");
        info!("   GET  /metrics");
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
