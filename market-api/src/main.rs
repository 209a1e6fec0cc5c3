//! Prediction Market Metadata API Server
//!
//! HTTP API for market lifecycle management and live liquidity streams.

mod config;
mod error;
mod routes;

use market_services::{
    broker, LiquidityPublisher, LiquidityStreamer, MarketRepository, MarketService,
    SqliteMarketStore,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ServiceConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub market_service: MarketService,
    pub streamer: LiquidityStreamer,
}

impl AppState {
    pub fn new(market_service: MarketService, stream_keepalive: Duration) -> Self {
        let streamer = LiquidityStreamer::new(market_service.clone(), stream_keepalive);
        Self {
            market_service,
            streamer,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local, then .env
    for file in [".env.local", ".env"] {
        if let Err(e) = dotenvy::from_filename(file) {
            // Not an error if the file doesn't exist
            if !matches!(e, dotenvy::Error::Io(_)) {
                eprintln!("Warning: Failed to load {}: {}", file, e);
            }
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,market_api=debug,market_services=debug")
            }),
        )
        .init();

    info!("Starting Prediction Market Metadata API");

    let config = ServiceConfig::from_env()?;
    info!("Configuration loaded: {:?}", config);

    // Open storage and make sure the schema exists
    info!("Opening market store at: {}", config.database_url);
    let store = SqliteMarketStore::from_url(&config.database_url)?;
    store.init_schema().await?;

    let broker = broker::connect(&config.broker_url, config.channel_capacity)?;
    info!("Topic broker ready ({})", config.broker_url);

    let market_service = MarketService::new(Arc::new(store), LiquidityPublisher::new(broker));
    let state = AppState::new(market_service, config.stream_keepalive);

    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
