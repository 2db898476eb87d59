//! Per-gamemode matchmaking

pub mod gamemode;
pub mod queue;
pub mod service;

pub use gamemode::Gamemode;
pub use queue::WaitingPlayer;
pub use service::MatchmakingService;

use crate::pool::PoolError;

#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid gamemode: {0}")]
    InvalidGamemode(String),

    #[error("Expected {expected} players, got {got}")]
    WrongPlayerCount { expected: usize, got: usize },

    #[error("Team {0} is missing from the instance")]
    MissingTeam(usize),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
