//! Application state shared across routes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::matchmaking::{gamemode, MatchmakingService};
use crate::pool::{PoolConfig, PoolError, WorkerPool};
use crate::tokens::TokenRegistry;
use crate::util::ids::GameId;
use crate::ws::seats::ActiveSessions;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: Arc<WorkerPool>,
    pub tokens: Arc<TokenRegistry>,
    pub matchmaking: Arc<MatchmakingService>,
    pub sessions: Arc<ActiveSessions>,
}

impl AppState {
    /// Build the state. The receiver yields ids of games that ended; hand it to [`spawn_reaper`].
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<GameId>) {
        let config = Arc::new(config);

        let (pool, ended_rx) = WorkerPool::new(PoolConfig {
            thread_limit: config.thread_limit,
            games_per_thread: config.games_per_thread,
            update_period: config.game_update_period,
            transmission_period: config.game_transmission_period,
        });
        let pool = Arc::new(pool);

        let tokens = Arc::new(TokenRegistry::new(config.token_grace));

        let matchmaking = Arc::new(MatchmakingService::new(
            gamemode::builtin(),
            Arc::clone(&pool),
            Arc::clone(&tokens),
        ));

        let state = Self {
            config,
            pool,
            tokens,
            matchmaking,
            sessions: Arc::new(ActiveSessions::new()),
        };
        (state, ended_rx)
    }
}

/// Tear down ended games: drop them from the pool and revoke their tokens
pub fn spawn_reaper(state: AppState, mut ended_rx: mpsc::UnboundedReceiver<GameId>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(game_id) = ended_rx.recv().await {
            reap(&state, &game_id);
        }
    })
}

fn reap(state: &AppState, game_id: &str) {
    match state.pool.remove_game(game_id) {
        Ok(()) | Err(PoolError::NotFound(_)) => {}
        Err(e) => error!(game_id = %game_id, error = %e, "Failed to remove ended game"),
    }
    let revoked = state.tokens.invalidate_game(game_id);
    info!(game_id = %game_id, revoked, "Reaped ended game");
}

/// Periodically drop redeemed tokens whose grace window has passed
pub fn spawn_token_sweeper(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = state.tokens.purge_expired(std::time::Instant::now());
            if purged > 0 {
                info!(purged, "Purged expired tokens");
            }
        }
    })
}
