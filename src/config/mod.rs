//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Most clusters the worker pool starts
    pub thread_limit: usize,
    /// Most games per cluster
    pub games_per_thread: usize,
    /// Cluster tick period
    pub game_update_period: Duration,
    /// Matchmaker fill check period
    pub mm_update_period: Duration,
    /// Snapshot broadcast period
    pub game_transmission_period: Duration,
    /// How long a redeemed token stays valid for one reconnect
    pub token_grace: Duration,

    /// Allowed client origins for CORS, comma-separated. Any origin when unset.
    pub client_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            thread_limit: 4,
            games_per_thread: 5,
            game_update_period: Duration::from_millis(16),
            mm_update_period: Duration::from_millis(1000),
            game_transmission_period: Duration::from_millis(50),
            token_grace: Duration::from_secs(10),
            client_origin: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for anything unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match (lookup("PORT"), lookup("SERVER_ADDR")) {
            (Some(port), _) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            (None, Some(addr)) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
            (None, None) => defaults.server_addr,
        };

        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_millis(positive(&lookup, name, default.as_millis() as u64)?))
        };

        Ok(Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            thread_limit: positive(&lookup, "THREAD_LIMIT", defaults.thread_limit)?,
            games_per_thread: positive(&lookup, "GAMES_PER_THREAD", defaults.games_per_thread)?,
            game_update_period: millis("GAME_UPDATE_PERIOD_MS", defaults.game_update_period)?,
            mm_update_period: millis("MM_UPDATE_PERIOD_MS", defaults.mm_update_period)?,
            game_transmission_period: millis(
                "GAME_TRANSMISSION_PERIOD_MS",
                defaults.game_transmission_period,
            )?,
            token_grace: Duration::from_secs(positive(
                &lookup,
                "TOKEN_GRACE_SECS",
                defaults.token_grace.as_secs(),
            )?),
            client_origin: lookup("CLIENT_ORIGIN").filter(|s| !s.trim().is_empty()),
        })
    }
}

/// Parse a non-zero number, or use `default` when unset
fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::Invalid(name)),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
