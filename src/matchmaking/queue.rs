//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::LobbyServerMsg;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct WaitingPlayer {
    pub id: Uuid,
    /// Code of the gamemode this player queued for
    pub gamemode: String,
    /// Outbound channel of the lobby connection
    connection: mpsc::UnboundedSender<LobbyServerMsg>,
    pub queued_at: Instant,
}

impl WaitingPlayer {
    pub fn new(gamemode: &str, connection: mpsc::UnboundedSender<LobbyServerMsg>) -> Self {
        Self::with_id(Uuid::new_v4(), gamemode, connection)
    }

    pub fn with_id(id: Uuid, gamemode: &str, connection: mpsc::UnboundedSender<LobbyServerMsg>) -> Self {
        Self {
            id,
            gamemode: gamemode.to_string(),
            connection,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }

    /// Returns false if the connection is gone
    pub fn notify(&self, msg: LobbyServerMsg) -> bool {
        self.connection.send(msg).is_ok()
    }
}

/// FIFO of players waiting for one gamemode
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<WaitingPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the back of the queue. Callers must not enqueue the same player twice.
    pub fn enqueue(&mut self, player: WaitingPlayer) {
        self.queue.push_back(player);
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, id: Uuid) -> Option<WaitingPlayer> {
        let pos = self.queue.iter().position(|p| p.id == id)?;
        self.queue.remove(pos)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.queue.iter().any(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The first `count` players, without removing them
    pub fn front(&self, count: usize) -> impl Iterator<Item = &WaitingPlayer> {
        self.queue.iter().take(count)
    }

    /// Remove and return exactly `count` players from the front, or nothing
    pub fn drain_front(&mut self, count: usize) -> Option<Vec<WaitingPlayer>> {
        if self.queue.len() < count {
            return None;
        }
        Some(self.queue.drain(..count).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaitingPlayer> {
        self.queue.iter()
    }
}
