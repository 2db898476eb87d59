//! Game session connections: redeem a handoff token, then play

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::game::PlayerInput;
use crate::pool::PoolError;
use crate::tokens::Binding;
use crate::util::ids::{GameId, PlayerId, TeamId};
use crate::util::rate_limit::InputRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{SessionClientMsg, SessionServerMsg};
use crate::ws::seats::SeatClaim;
use crate::ws::{send_close, send_msg, WsSink, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for a token
    Opening,
    InGame { game_id: GameId, player_id: PlayerId },
    Closing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Token resolved and the seat exists
    Redeemed {
        binding: Binding,
        team_id: TeamId,
        team_ids: Vec<TeamId>,
        server_time: u64,
    },
    RedeemFailed { reason: String },
    Input(PlayerInput),
    Ping { t: u64 },
    /// Broadcast from the bound game
    Game(SessionServerMsg),
    /// A newer connection redeemed the same seat
    Superseded,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Take the seat, evicting any older connection on it
    Claim { game_id: GameId, player_id: PlayerId },
    Send(SessionServerMsg),
    Subscribe { game_id: GameId },
    ApplyInput {
        game_id: GameId,
        player_id: PlayerId,
        input: PlayerInput,
    },
    Close { code: u16, reason: &'static str },
}

pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, Vec<SessionEffect>) {
    use SessionEffect::*;

    match (state, event) {
        (SessionState::Closing, _) => (SessionState::Closing, vec![]),

        (_, SessionEvent::Disconnected) => (SessionState::Closing, vec![]),

        (state, SessionEvent::Ping { t }) => (state, vec![Send(SessionServerMsg::Pong { t })]),

        (
            SessionState::Opening,
            SessionEvent::Redeemed {
                binding,
                team_id,
                team_ids,
                server_time,
            },
        ) => (
            SessionState::InGame {
                game_id: binding.game_id.clone(),
                player_id: binding.player_id.clone(),
            },
            vec![
                Claim {
                    game_id: binding.game_id.clone(),
                    player_id: binding.player_id.clone(),
                },
                Send(SessionServerMsg::Joined {
                    valid: true,
                    game_id: binding.game_id.clone(),
                    player_id: binding.player_id,
                    team_id,
                    team_ids,
                    server_time,
                }),
                Subscribe {
                    game_id: binding.game_id,
                },
            ],
        ),

        (SessionState::Opening, SessionEvent::RedeemFailed { reason }) => (
            SessionState::Closing,
            vec![
                Send(SessionServerMsg::Rejected { valid: false, reason }),
                Close {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "Invalid token",
                },
            ],
        ),

        (state @ SessionState::InGame { .. }, SessionEvent::Redeemed { .. })
        | (state @ SessionState::InGame { .. }, SessionEvent::RedeemFailed { .. }) => (
            state,
            vec![Send(SessionServerMsg::Error {
                code: "already_joined".to_string(),
                message: "This connection is already in a game".to_string(),
            })],
        ),

        (SessionState::InGame { game_id, player_id }, SessionEvent::Input(input)) => (
            SessionState::InGame {
                game_id: game_id.clone(),
                player_id: player_id.clone(),
            },
            vec![ApplyInput {
                game_id,
                player_id,
                input,
            }],
        ),

        (SessionState::InGame { .. }, SessionEvent::Game(msg @ SessionServerMsg::GameOver { .. })) => (
            SessionState::Closing,
            vec![
                Send(msg),
                Close {
                    code: CLOSE_NORMAL,
                    reason: "Game over",
                },
            ],
        ),

        (state @ SessionState::InGame { .. }, SessionEvent::Game(msg)) => (state, vec![Send(msg)]),

        (SessionState::InGame { .. }, SessionEvent::Superseded) => (
            SessionState::Closing,
            vec![
                Send(SessionServerMsg::Error {
                    code: "superseded".to_string(),
                    message: "Another connection took over this player".to_string(),
                }),
                Close {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "Replaced by a newer connection",
                },
            ],
        ),

        // Nothing to steer or watch before a token is redeemed
        (SessionState::Opening, SessionEvent::Input(_))
        | (SessionState::Opening, SessionEvent::Game(_))
        | (SessionState::Opening, SessionEvent::Superseded) => (SessionState::Opening, vec![]),
    }
}

/// WebSocket upgrade handler for game sessions
pub async fn session_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let rate_limiter = InputRateLimiter::new();
    let mut session = SessionState::Opening;
    let mut updates: Option<broadcast::Receiver<SessionServerMsg>> = None;
    let mut seat: Option<SeatClaim> = None;

    while session != SessionState::Closing {
        let event = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<SessionClientMsg>(&text) {
                    Ok(SessionClientMsg::Input { direction, boost, brake }) => {
                        if !rate_limiter.check() {
                            debug!("Rate limited input message");
                            continue;
                        }
                        SessionEvent::Input(PlayerInput { direction, boost, brake })
                    }
                    Ok(SessionClientMsg::Redeem { token }) => redeem(&state, &token),
                    Ok(SessionClientMsg::Ping { t }) => SessionEvent::Ping { t },
                    Err(e) => {
                        warn!(error = %e, "Failed to parse session message");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => SessionEvent::Disconnected,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "Session socket error");
                    SessionEvent::Disconnected
                }
            },
            update = next_update(&mut updates) => match update {
                Ok(msg) => SessionEvent::Game(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_count = n, "Client lagged, skipping {} updates", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    updates = None;
                    SessionEvent::Game(SessionServerMsg::GameOver { winning_team: None })
                }
            },
            _ = evicted(&seat) => SessionEvent::Superseded,
        };

        let (next, effects) = transition(std::mem::replace(&mut session, SessionState::Closing), event);
        session = next;
        if !apply(effects, &state, &mut sink, &mut updates, &mut seat).await {
            break;
        }
    }

    if let SessionState::InGame { game_id, player_id } = &session {
        info!(game_id = %game_id, player_id = %player_id, "Player disconnected from game");
    }
    debug!("Session connection closed");
}

/// Look up a token and the seat it points to
fn redeem(state: &AppState, token: &str) -> SessionEvent {
    let binding = match state.tokens.redeem(token) {
        Ok(binding) => binding,
        Err(e) => {
            warn!(error = %e, "Token rejected");
            return SessionEvent::RedeemFailed { reason: e.to_string() };
        }
    };

    let seat = state.pool.get_game(&binding.game_id).and_then(|game| {
        game.with_instance(|instance| {
            let team_id = instance.team_of(&binding.player_id).map(|t| t.id.clone());
            let team_ids = instance.teams.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
            team_id.map(|team_id| (team_id, team_ids))
        })
    });

    match seat {
        Ok(Some((team_id, team_ids))) => {
            info!(game_id = %binding.game_id, player_id = %binding.player_id, "Player joined game");
            SessionEvent::Redeemed {
                binding,
                team_id,
                team_ids,
                server_time: unix_millis(),
            }
        }
        Ok(None) | Err(PoolError::NotFound(_)) => {
            warn!(game_id = %binding.game_id, "Token points at a game that is gone");
            SessionEvent::RedeemFailed {
                reason: "Game no longer exists".to_string(),
            }
        }
        Err(e) => SessionEvent::RedeemFailed { reason: e.to_string() },
    }
}

async fn evicted(seat: &Option<SeatClaim>) {
    match seat {
        Some(claim) => claim.evicted().await,
        None => std::future::pending().await,
    }
}

async fn next_update(
    updates: &mut Option<broadcast::Receiver<SessionServerMsg>>,
) -> Result<SessionServerMsg, broadcast::error::RecvError> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Run effects. Returns false once the socket is gone.
async fn apply(
    effects: Vec<SessionEffect>,
    state: &AppState,
    sink: &mut WsSink,
    updates: &mut Option<broadcast::Receiver<SessionServerMsg>>,
    seat: &mut Option<SeatClaim>,
) -> bool {
    for effect in effects {
        match effect {
            SessionEffect::Claim { game_id, player_id } => {
                *seat = Some(state.sessions.claim(&game_id, &player_id));
            }
            SessionEffect::Send(msg) => {
                if let Err(e) = send_msg(sink, &msg).await {
                    debug!(error = %e, "Session send failed");
                    return false;
                }
            }
            SessionEffect::Subscribe { game_id } => {
                match state.pool.get_game(&game_id).and_then(|game| game.subscribe()) {
                    Ok(rx) => *updates = Some(rx),
                    Err(e) => warn!(game_id = %game_id, error = %e, "Could not subscribe to game"),
                }
            }
            SessionEffect::ApplyInput {
                game_id,
                player_id,
                input,
            } => {
                let applied = state
                    .pool
                    .get_game(&game_id)
                    .and_then(|game| game.with_instance(|g| g.apply_input(&player_id, input)));
                match applied {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(game_id = %game_id, error = %e, "Input ignored"),
                    Err(e) => debug!(game_id = %game_id, error = %e, "Input for missing game"),
                }
            }
            SessionEffect::Close { code, reason } => {
                debug!(code, reason, "Closing session connection");
                let _ = send_close(sink, code, reason).await;
            }
        }
    }
    true
}
