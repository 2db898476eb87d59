//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::game::InstanceSnapshot;
use crate::matchmaking::Gamemode;
use crate::pool::PoolError;
use crate::util::time::uptime_secs;
use crate::ws::{lobby_ws_handler, session_ws_handler};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/gamemodes", get(gamemodes_handler))
        .route("/games/:id", get(game_handler))
        .route("/ws/matchmaking", get(lobby_ws_handler))
        .route("/ws/game", get(session_ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(state.config.client_origin.as_deref()))
        .with_state(state)
}

/// CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
fn cors_layer(client_origin: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match client_origin {
        Some(origins) => {
            let allowed: Vec<header::HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
                .collect();
            cors.allow_origin(allowed)
        }
        None => cors.allow_origin(Any),
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    clusters: usize,
    active_games: usize,
    capacity: usize,
    pending_tokens: usize,
    queues: Vec<QueueLength>,
}

#[derive(Serialize)]
struct QueueLength {
    gamemode: String,
    waiting: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queues = state
        .matchmaking
        .queue_lengths()
        .into_iter()
        .map(|(gamemode, waiting)| QueueLength { gamemode, waiting })
        .collect();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        clusters: state.pool.cluster_count(),
        active_games: state.pool.game_count(),
        capacity: state.pool.capacity(),
        pending_tokens: state.tokens.len(),
        queues,
    })
}

// ============================================================================
// Game endpoints
// ============================================================================

async fn gamemodes_handler(State(state): State<AppState>) -> Json<Vec<Gamemode>> {
    Json(state.matchmaking.gamemodes())
}

async fn game_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceSnapshot>, AppError> {
    let snapshot = state.pool.get_game(&id)?.encoded()?;
    Ok(Json(snapshot))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server is at capacity")]
    ResourceExhausted,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PoolError> for AppError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::NotFound(id) => AppError::NotFound(format!("game {}", id)),
            PoolError::ResourceExhausted => AppError::ResourceExhausted,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_errors_map_to_status_codes() {
        let not_found: AppError = PoolError::NotFound("g".to_string()).into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let busy: AppError = PoolError::ResourceExhausted.into();
        assert_eq!(busy.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let broken: AppError = PoolError::InvariantViolation("g".to_string()).into();
        assert_eq!(broken.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn unknown_game_is_404() {
        let (state, _ended) = AppState::new(crate::config::Config::default());
        let result = game_handler(State(state), Path("missing".to_string())).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn live_game_returns_its_snapshot() {
        let (state, _ended) = AppState::new(crate::config::Config::default());
        let (id, _) = state.pool.create_game().unwrap();

        let Json(snapshot) = game_handler(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(snapshot.game_id, id);
        state.pool.shutdown().await;
    }
}
