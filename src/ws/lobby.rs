//! Lobby connections: queue for a gamemode and wait for a handoff token

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::matchmaking::WaitingPlayer;
use crate::util::ids::{GameId, Token};
use crate::ws::protocol::{LobbyClientMsg, LobbyServerMsg};
use crate::ws::{send_close, send_msg, WsSink, CLOSE_PROTOCOL_ERROR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyState {
    /// Connected, no gamemode chosen yet
    Initial,
    /// Waiting in a gamemode queue
    Finding { player_id: Uuid, gamemode: String },
    /// Matched; the token has been sent and the client moves to a game socket
    Filling,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    FindGame { gamemode: String, player_id: Uuid },
    Ping { t: u64 },
    QueueStatus { count: usize, enough: bool },
    Matched { token: Token, game_id: GameId },
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEffect {
    Enqueue { player_id: Uuid, gamemode: String },
    Dequeue { player_id: Uuid, gamemode: String },
    Send(LobbyServerMsg),
    Close { code: u16, reason: &'static str },
}

impl LobbyEvent {
    fn from_client(msg: LobbyClientMsg) -> Self {
        match msg {
            LobbyClientMsg::FindGame { gamemode } => LobbyEvent::FindGame {
                gamemode,
                player_id: Uuid::new_v4(),
            },
            LobbyClientMsg::Ping { t } => LobbyEvent::Ping { t },
        }
    }

    fn from_matchmaker(msg: LobbyServerMsg) -> Option<Self> {
        match msg {
            LobbyServerMsg::QueueStatus { count, enough } => Some(LobbyEvent::QueueStatus { count, enough }),
            LobbyServerMsg::Matched { token, game_id, .. } => Some(LobbyEvent::Matched { token, game_id }),
            _ => None,
        }
    }
}

/// Advance a lobby connection. `is_known` says whether a gamemode code exists.
pub fn transition(
    state: LobbyState,
    event: LobbyEvent,
    is_known: impl Fn(&str) -> bool,
) -> (LobbyState, Vec<LobbyEffect>) {
    use LobbyEffect::*;

    match (state, event) {
        (LobbyState::Closed, _) => (LobbyState::Closed, vec![]),

        (state, LobbyEvent::Ping { t }) => (state, vec![Send(LobbyServerMsg::Pong { t })]),

        (LobbyState::Initial, LobbyEvent::FindGame { gamemode, player_id }) => {
            if !is_known(&gamemode) {
                return (
                    LobbyState::Closed,
                    vec![
                        Send(LobbyServerMsg::Error {
                            code: "invalid_gamemode".to_string(),
                            message: format!("Unknown gamemode: {}", gamemode),
                        }),
                        Close {
                            code: CLOSE_PROTOCOL_ERROR,
                            reason: "Invalid gamemode",
                        },
                    ],
                );
            }
            (
                LobbyState::Finding {
                    player_id,
                    gamemode: gamemode.clone(),
                },
                vec![
                    Enqueue {
                        player_id,
                        gamemode: gamemode.clone(),
                    },
                    Send(LobbyServerMsg::Queued { player_id, gamemode }),
                ],
            )
        }

        (state @ LobbyState::Finding { .. }, LobbyEvent::FindGame { .. })
        | (state @ LobbyState::Filling, LobbyEvent::FindGame { .. }) => (
            state,
            vec![Send(LobbyServerMsg::Error {
                code: "already_queued".to_string(),
                message: "This connection already joined a queue".to_string(),
            })],
        ),

        (state @ LobbyState::Finding { .. }, LobbyEvent::QueueStatus { count, enough }) => {
            (state, vec![Send(LobbyServerMsg::QueueStatus { count, enough })])
        }

        (LobbyState::Finding { .. }, LobbyEvent::Matched { token, game_id }) => (
            LobbyState::Filling,
            vec![Send(LobbyServerMsg::Matched {
                token,
                game_id,
                enough: true,
            })],
        ),

        (LobbyState::Finding { player_id, gamemode }, LobbyEvent::Disconnected) => {
            (LobbyState::Closed, vec![Dequeue { player_id, gamemode }])
        }

        (_, LobbyEvent::Disconnected) => (LobbyState::Closed, vec![]),

        // Matchmaker updates outside Finding are stale
        (state, LobbyEvent::QueueStatus { .. }) | (state, LobbyEvent::Matched { .. }) => (state, vec![]),
    }
}

/// WebSocket upgrade handler for the matchmaking lobby
pub async fn lobby_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| run_lobby(socket, state))
}

async fn run_lobby(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<LobbyServerMsg>();
    let mut lobby = LobbyState::Initial;

    debug!("New lobby connection");

    while lobby != LobbyState::Closed {
        let event = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<LobbyClientMsg>(&text) {
                    Ok(msg) => LobbyEvent::from_client(msg),
                    Err(e) => {
                        warn!(error = %e, "Failed to parse lobby message");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => LobbyEvent::Disconnected,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "Lobby socket error");
                    LobbyEvent::Disconnected
                }
            },
            Some(msg) = notify_rx.recv() => match LobbyEvent::from_matchmaker(msg) {
                Some(event) => event,
                None => continue,
            },
        };

        let lost = step(&mut lobby, event, &state, &mut sink, &notify_tx).await;
        if lost {
            break;
        }
    }

    // The socket died mid-queue: leave the queue
    if lobby != LobbyState::Closed {
        step(&mut lobby, LobbyEvent::Disconnected, &state, &mut sink, &notify_tx).await;
    }
    debug!("Lobby connection closed");
}

/// Apply one event. Returns true if the socket is gone.
async fn step(
    lobby: &mut LobbyState,
    event: LobbyEvent,
    state: &AppState,
    sink: &mut WsSink,
    notify_tx: &mpsc::UnboundedSender<LobbyServerMsg>,
) -> bool {
    let is_known = |code: &str| state.matchmaking.get(code).is_ok();
    let (next, effects) = transition(std::mem::replace(lobby, LobbyState::Closed), event, is_known);
    *lobby = next;

    let mut lost = false;
    for effect in effects {
        match effect {
            LobbyEffect::Enqueue { player_id, gamemode } => {
                if let Ok(matchmaker) = state.matchmaking.get(&gamemode) {
                    matchmaker.add_player(WaitingPlayer::with_id(player_id, &gamemode, notify_tx.clone()));
                }
            }
            LobbyEffect::Dequeue { player_id, gamemode } => {
                if let Ok(matchmaker) = state.matchmaking.get(&gamemode) {
                    matchmaker.remove_player(player_id);
                }
            }
            LobbyEffect::Send(msg) if !lost => {
                if let Err(e) = send_msg(sink, &msg).await {
                    debug!(error = %e, "Lobby send failed");
                    lost = true;
                }
            }
            LobbyEffect::Close { code, reason } if !lost => {
                warn!(code, reason, "Closing lobby connection");
                let _ = send_close(sink, code, reason).await;
            }
            LobbyEffect::Send(_) | LobbyEffect::Close { .. } => {}
        }
    }
    lost
}
