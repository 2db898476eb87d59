//! A cluster: one fixed-tick loop hosting a bounded set of game instances

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::game::snapshot::SnapshotPacer;
use crate::game::{GameEvent, GameInstance};
use crate::util::ids::GameId;
use crate::util::scheduler::{spawn_fixed_period_thread, LoopThread};
use crate::ws::protocol::SessionServerMsg;

use super::PoolError;

/// Capacity of each game's outbound broadcast channel
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// An instance plus the plumbing the cluster keeps for it
struct HostedGame {
    instance: GameInstance,
    snapshot_tx: broadcast::Sender<SessionServerMsg>,
    pacer: SnapshotPacer,
    /// Finished or faulted; no longer ticked, waiting for removal
    ended: bool,
}

impl HostedGame {
    fn publish(&mut self, events: Vec<GameEvent>) {
        for event in events {
            let msg = match event {
                GameEvent::PlayerDied { player_id, team_id } => {
                    SessionServerMsg::PlayerDied { player_id, team_id }
                }
            };
            let _ = self.snapshot_tx.send(msg);
            self.pacer.force_next();
        }

        if self.pacer.should_send() {
            let _ = self.snapshot_tx.send(SessionServerMsg::Snapshot {
                state: self.instance.get_encoded(),
            });
        }
    }
}

/// Runs every hosted instance, in order, once per tick period.
///
/// Instances are only ever touched under the cluster's single lock, which the
/// tick holds for the whole pass, so an update never interleaves with a read.
pub struct Cluster {
    pub id: usize,
    games_per_thread: usize,
    period: Duration,
    snapshot_interval: u32,
    games: Mutex<Vec<HostedGame>>,
    ended_tx: mpsc::UnboundedSender<GameId>,
}

impl Cluster {
    pub fn new(
        id: usize,
        games_per_thread: usize,
        period: Duration,
        snapshot_interval: u32,
        ended_tx: mpsc::UnboundedSender<GameId>,
    ) -> Self {
        Self {
            id,
            games_per_thread,
            period,
            snapshot_interval,
            games: Mutex::new(Vec::with_capacity(games_per_thread)),
            ended_tx,
        }
    }

    /// Start the tick loop on a thread of its own; it runs until `cancel` fires
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> io::Result<LoopThread> {
        info!(cluster = self.id, period_ms = self.period.as_millis() as u64, "Starting cluster");
        let cluster = Arc::clone(self);
        spawn_fixed_period_thread(format!("cluster-{}", self.id), self.period, cancel, move || {
            cluster.tick()
        })
    }

    /// Do we have enough space to add a new game?
    pub fn can_add_game(&self) -> bool {
        self.games.lock().len() < self.games_per_thread
    }

    pub fn game_count(&self) -> usize {
        self.games.lock().len()
    }

    /// Create an empty instance with a random seed
    pub fn create_instance(&self, id: GameId) -> Result<(), PoolError> {
        self.host(GameInstance::new(id, rand::random()))
    }

    /// Take ownership of an already-built instance
    pub fn host(&self, instance: GameInstance) -> Result<(), PoolError> {
        let mut games = self.games.lock();
        if games.len() >= self.games_per_thread {
            return Err(PoolError::ResourceExhausted);
        }
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        games.push(HostedGame {
            instance,
            snapshot_tx,
            pacer: SnapshotPacer::new(self.snapshot_interval),
            ended: false,
        });
        Ok(())
    }

    /// Returns false if this cluster did not host `id`
    pub fn remove_instance(&self, id: &str) -> bool {
        let mut games = self.games.lock();
        let before = games.len();
        games.retain(|g| g.instance.id != id);
        games.len() < before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.games.lock().iter().any(|g| g.instance.id == id)
    }

    /// Run `f` against a hosted instance, serialized with the tick loop
    pub fn with_instance<R>(&self, id: &str, f: impl FnOnce(&mut GameInstance) -> R) -> Option<R> {
        let mut games = self.games.lock();
        games
            .iter_mut()
            .find(|g| g.instance.id == id)
            .map(|g| f(&mut g.instance))
    }

    /// Receive this game's snapshots and events
    pub fn subscribe(&self, id: &str) -> Option<broadcast::Receiver<SessionServerMsg>> {
        self.games
            .lock()
            .iter()
            .find(|g| g.instance.id == id)
            .map(|g| g.snapshot_tx.subscribe())
    }

    /// One pass over every live instance
    pub fn tick(&self) {
        let dt = self.period.as_secs_f32();
        let mut games = self.games.lock();

        for hosted in games.iter_mut().filter(|g| !g.ended) {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| hosted.instance.update(dt)));

            let events = match outcome {
                Ok(events) => events,
                Err(cause) => {
                    error!(
                        cluster = self.id,
                        game_id = %hosted.instance.id,
                        cause = %panic_message(cause.as_ref()),
                        "Game update failed; ending game"
                    );
                    hosted.ended = true;
                    let _ = hosted.snapshot_tx.send(SessionServerMsg::GameOver { winning_team: None });
                    let _ = self.ended_tx.send(hosted.instance.id.clone());
                    continue;
                }
            };

            hosted.publish(events);

            if hosted.instance.is_finished() {
                let winning_team = hosted.instance.winning_team().map(|t| t.id.clone());
                info!(
                    cluster = self.id,
                    game_id = %hosted.instance.id,
                    winning_team = ?winning_team,
                    "Game over"
                );
                hosted.ended = true;
                let _ = hosted.snapshot_tx.send(SessionServerMsg::Snapshot {
                    state: hosted.instance.get_encoded(),
                });
                let _ = hosted.snapshot_tx.send(SessionServerMsg::GameOver { winning_team });
                let _ = self.ended_tx.send(hosted.instance.id.clone());
            }
        }
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("id", &self.id)
            .field("games", &self.games.try_lock().map(|games| games.len()))
            .field("games_per_thread", &self.games_per_thread)
            .finish()
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
