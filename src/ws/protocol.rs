//! WebSocket protocol message definitions
//! These are the wire types for the matchmaking lobby and in-game sessions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::InstanceSnapshot;
use crate::util::ids::{GameId, PlayerId, TeamId, Token};

/// Messages sent from a lobby client to the matchmaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyClientMsg {
    /// Join the queue for a gamemode, by code (e.g. "duel", "tdm3")
    FindGame { gamemode: String },

    /// Ping for latency measurement
    Ping { t: u64 },
}

/// Messages sent from the matchmaker to a lobby client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyServerMsg {
    /// Accepted into the queue
    Queued { player_id: Uuid, gamemode: String },

    /// Periodic queue length update
    QueueStatus { count: usize, enough: bool },

    /// A game was filled; reconnect to the game socket with this token
    Matched {
        token: Token,
        game_id: GameId,
        enough: bool,
    },

    Error { code: String, message: String },

    Pong { t: u64 },
}

/// Messages sent from an in-game client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionClientMsg {
    /// Present the handoff token received from matchmaking
    Redeem { token: Token },

    /// Steering input
    Input {
        /// Heading in radians, if changed
        #[serde(default)]
        direction: Option<f32>,
        #[serde(default)]
        boost: bool,
        #[serde(default)]
        brake: bool,
    },

    Ping { t: u64 },
}

/// Messages sent from a game to in-game clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionServerMsg {
    /// Token accepted; the connection now controls `player_id`
    Joined {
        valid: bool,
        game_id: GameId,
        player_id: PlayerId,
        team_id: TeamId,
        /// Every team in the game, in team order
        team_ids: Vec<TeamId>,
        server_time: u64,
    },

    /// Token refused; the connection will be closed
    Rejected { valid: bool, reason: String },

    /// Game state snapshot (sent at regular intervals)
    Snapshot { state: InstanceSnapshot },

    PlayerDied { player_id: PlayerId, team_id: TeamId },

    /// The game is over and will be torn down
    GameOver { winning_team: Option<TeamId> },

    Error { code: String, message: String },

    Pong { t: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: LobbyClientMsg =
            serde_json::from_str(r#"{"type":"find_game","gamemode":"duel"}"#).unwrap();
        assert_eq!(msg, LobbyClientMsg::FindGame { gamemode: "duel".to_string() });

        let input: SessionClientMsg = serde_json::from_str(r#"{"type":"input","boost":true}"#).unwrap();
        assert_eq!(
            input,
            SessionClientMsg::Input { direction: None, boost: true, brake: false }
        );
    }

    #[test]
    fn rejection_carries_valid_false() {
        let json = serde_json::to_value(SessionServerMsg::Rejected {
            valid: false,
            reason: "unknown token".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "rejected");
        assert_eq!(json["valid"], false);
    }
}
