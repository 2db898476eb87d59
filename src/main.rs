//! Truck Arena Server - matchmaking and session host for multiplayer truck battles
//!
//! This is the main entry point for the game server. It handles:
//! - A bounded worker pool of fixed-tick clusters running game instances
//! - Per-gamemode matchmaking queues that fill new games
//! - Token handoff from the lobby socket to the game socket

mod app;
mod config;
mod game;
mod http;
mod matchmaking;
mod pool;
mod tokens;
mod util;
mod ws;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::{spawn_reaper, spawn_token_sweeper, AppState};
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level);
    init_server_time();

    info!("Starting Truck Arena Server");
    info!(
        thread_limit = config.thread_limit,
        games_per_thread = config.games_per_thread,
        tick_ms = config.game_update_period.as_millis() as u64,
        "Worker pool configured"
    );

    let (state, ended_rx) = AppState::new(config.clone());

    let matchmakers = CancellationToken::new();
    let matchmaker_tasks = state.matchmaking.start(config.mm_update_period, &matchmakers);
    let reaper = spawn_reaper(state.clone(), ended_rx);
    let sweeper = spawn_token_sweeper(state.clone(), config.token_grace.max(Duration::from_secs(1)));

    let router = build_router(state.clone());

    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Lobby endpoint: ws://{}/ws/matchmaking", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    matchmakers.cancel();
    for task in matchmaker_tasks {
        task.await?;
    }
    state.pool.shutdown().await;
    reaper.abort();
    sweeper.abort();

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
