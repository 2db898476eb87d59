//! Matchmaking service - per-gamemode queues and periodic game filling

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pool::{Cluster, PoolError, WorkerPool};
use crate::tokens::TokenRegistry;
use crate::util::ids::GameId;
use crate::util::scheduler::spawn_fixed_period;
use crate::ws::protocol::LobbyServerMsg;

use super::gamemode::{Gamemode, Seat};
use super::queue::{MatchmakingQueue, WaitingPlayer};
use super::MatchmakingError;

/// Result of one fill check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    /// Not enough players queued yet
    Waiting { queued: usize },
    Filled { game_id: GameId },
    /// No free slot in the pool; retried on the next check
    Exhausted,
    /// Seating failed; the game was discarded and the queue left alone
    Failed,
}

/// Queue and fill loop for one gamemode
pub struct Matchmaker {
    gamemode: Gamemode,
    queue: Mutex<MatchmakingQueue>,
    pool: Arc<WorkerPool>,
    tokens: Arc<TokenRegistry>,
}

impl Matchmaker {
    pub fn new(gamemode: Gamemode, pool: Arc<WorkerPool>, tokens: Arc<TokenRegistry>) -> Self {
        Self {
            gamemode,
            queue: Mutex::new(MatchmakingQueue::new()),
            pool,
            tokens,
        }
    }

    pub fn gamemode(&self) -> &Gamemode {
        &self.gamemode
    }

    /// Start the periodic fill check
    pub fn start(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        info!(gamemode = %self.gamemode.code, period_ms = period.as_millis() as u64, "Starting matchmaker");
        let matchmaker = Arc::clone(self);
        spawn_fixed_period(
            format!("matchmaker-{}", self.gamemode.code),
            period,
            cancel,
            move || {
                matchmaker.fill_check();
            },
        )
    }

    /// Join the queue
    pub fn add_player(&self, player: WaitingPlayer) {
        let id = player.id;
        let mut queue = self.queue.lock();
        queue.enqueue(player);
        info!(gamemode = %self.gamemode.code, player_id = %id, queue_size = queue.len(), "Player joined matchmaking queue");
    }

    /// Leave the queue, e.g. on disconnect before matching
    pub fn remove_player(&self, id: Uuid) -> bool {
        let removed = self.queue.lock().dequeue(id).is_some();
        if removed {
            debug!(gamemode = %self.gamemode.code, player_id = %id, "Player left matchmaking queue");
        }
        removed
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Fill one game if enough players are waiting.
    ///
    /// The queue lock is held for the whole attempt, so players are drained
    /// only after their seats exist, and never partially.
    pub fn fill_check(&self) -> FillOutcome {
        let mut queue = self.queue.lock();
        let needed = self.gamemode.total_players();

        if queue.len() < needed {
            notify_status(&queue, false);
            return FillOutcome::Waiting { queued: queue.len() };
        }

        let (game_id, cluster) = match self.pool.create_game() {
            Ok(created) => created,
            Err(PoolError::ResourceExhausted) => {
                info!(gamemode = %self.gamemode.code, queued = queue.len(), "No capacity for a new game, retrying next check");
                notify_status(&queue, true);
                return FillOutcome::Exhausted;
            }
            Err(e) => {
                warn!(gamemode = %self.gamemode.code, error = %e, "Could not create game");
                return FillOutcome::Failed;
            }
        };

        let seats = match self.seat_players(&queue, &game_id, &cluster) {
            Ok(seats) => seats,
            Err(e) => {
                error!(gamemode = %self.gamemode.code, game_id = %game_id, error = %e, "Failed to seat players");
                if let Err(e) = self.pool.remove_game(&game_id) {
                    error!(game_id = %game_id, error = %e, "Failed to discard unseated game");
                }
                return FillOutcome::Failed;
            }
        };

        // seat_players saw `needed` players under this same lock
        let Some(players) = queue.drain_front(needed) else {
            let _ = self.pool.remove_game(&game_id);
            return FillOutcome::Failed;
        };

        for (player, seat) in players.iter().zip(seats) {
            let token = self.tokens.mint(&game_id, &seat.player_id);
            if !player.notify(LobbyServerMsg::Matched {
                token,
                game_id: game_id.clone(),
                enough: true,
            }) {
                debug!(player_id = %player.id, "Matched player already disconnected");
            }
        }

        info!(
            gamemode = %self.gamemode.code,
            game_id = %game_id,
            cluster = cluster.id,
            players = needed,
            longest_wait_ms = players[0].wait_time().as_millis() as u64,
            "Filled game"
        );
        FillOutcome::Filled { game_id }
    }

    fn seat_players(
        &self,
        queue: &MatchmakingQueue,
        game_id: &str,
        cluster: &Cluster,
    ) -> Result<Vec<Seat>, MatchmakingError> {
        let needed = self.gamemode.total_players();
        cluster
            .with_instance(game_id, |game| self.gamemode.fill_game(game, queue.front(needed)))
            .ok_or_else(|| PoolError::NotFound(game_id.to_string()))?
    }
}

/// Tell every waiting player how long the queue is
fn notify_status(queue: &MatchmakingQueue, enough: bool) {
    let status = LobbyServerMsg::QueueStatus {
        count: queue.len(),
        enough,
    };
    for player in queue.iter() {
        player.notify(status.clone());
    }
}

/// All matchmakers, by gamemode code
pub struct MatchmakingService {
    matchmakers: HashMap<String, Arc<Matchmaker>>,
    /// Gamemode codes in registration order
    order: Vec<String>,
}

impl MatchmakingService {
    pub fn new(gamemodes: Vec<Gamemode>, pool: Arc<WorkerPool>, tokens: Arc<TokenRegistry>) -> Self {
        let mut matchmakers = HashMap::new();
        let mut order = Vec::new();
        for gamemode in gamemodes {
            order.push(gamemode.code.clone());
            let code = gamemode.code.clone();
            matchmakers.insert(
                code,
                Arc::new(Matchmaker::new(gamemode, Arc::clone(&pool), Arc::clone(&tokens))),
            );
        }
        Self { matchmakers, order }
    }

    pub fn get(&self, code: &str) -> Result<Arc<Matchmaker>, MatchmakingError> {
        self.matchmakers
            .get(code)
            .cloned()
            .ok_or_else(|| MatchmakingError::InvalidGamemode(code.to_string()))
    }

    pub fn gamemodes(&self) -> Vec<Gamemode> {
        self.iter().map(|m| m.gamemode().clone()).collect()
    }

    /// Queue length per gamemode code
    pub fn queue_lengths(&self) -> Vec<(String, usize)> {
        self.iter()
            .map(|m| (m.gamemode().code.clone(), m.queue_len()))
            .collect()
    }

    /// Start every matchmaker's fill loop
    pub fn start(&self, period: Duration, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.iter()
            .map(|m| m.start(period, cancel.child_token()))
            .collect()
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Matchmaker>> {
        self.order.iter().filter_map(|code| self.matchmakers.get(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::gamemode;
    use crate::pool::PoolConfig;
    use tokio::sync::mpsc;

    struct Fixture {
        pool: Arc<WorkerPool>,
        tokens: Arc<TokenRegistry>,
    }

    fn fixture(thread_limit: usize, games_per_thread: usize) -> Fixture {
        let (pool, _ended) = WorkerPool::new(PoolConfig {
            thread_limit,
            games_per_thread,
            ..PoolConfig::default()
        });
        Fixture {
            pool: Arc::new(pool),
            tokens: Arc::new(TokenRegistry::new(Duration::from_secs(10))),
        }
    }

    fn join(
        matchmaker: &Matchmaker,
    ) -> (Uuid, mpsc::UnboundedReceiver<LobbyServerMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = WaitingPlayer::new(&matchmaker.gamemode().code, tx);
        let id = player.id;
        matchmaker.add_player(player);
        (id, rx)
    }

    #[tokio::test]
    async fn two_waiting_players_fill_a_duel() {
        let fx = fixture(1, 1);
        let mm = Matchmaker::new(Gamemode::new("duel", 2, 1), fx.pool.clone(), fx.tokens.clone());
        let (_, mut rx_a) = join(&mm);
        let (_, mut rx_b) = join(&mm);

        let game_id = match mm.fill_check() {
            FillOutcome::Filled { game_id } => game_id,
            other => panic!("expected a filled game, got {:?}", other),
        };

        assert_eq!(fx.pool.game_count(), 1);
        assert_eq!(mm.queue_len(), 0);
        assert_eq!(fx.tokens.len(), 2);

        let game = fx.pool.get_game(&game_id).unwrap();
        let shape = game
            .with_instance(|g| g.teams.iter().map(|t| t.players.len()).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(shape, vec![1, 1]);

        let mut seated = Vec::new();
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                LobbyServerMsg::Matched { token, game_id: matched, enough } => {
                    assert!(enough);
                    assert_eq!(matched, game_id);
                    let binding = fx.tokens.redeem(&token).unwrap();
                    assert_eq!(binding.game_id, game_id);
                    seated.push(binding.player_id);
                }
                other => panic!("expected matched, got {:?}", other),
            }
        }
        assert_ne!(seated[0], seated[1]);
        fx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn single_player_waits() {
        let fx = fixture(1, 1);
        let mm = Matchmaker::new(Gamemode::new("duel", 2, 1), fx.pool.clone(), fx.tokens.clone());
        let (_, mut rx) = join(&mm);

        assert_eq!(mm.fill_check(), FillOutcome::Waiting { queued: 1 });
        assert_eq!(fx.pool.game_count(), 0);
        assert_eq!(mm.queue_len(), 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            LobbyServerMsg::QueueStatus { count: 1, enough: false }
        );
    }

    #[tokio::test]
    async fn exhausted_pool_leaves_queue_untouched() {
        let fx = fixture(1, 1);
        fx.pool.create_game().unwrap();
        let mm = Matchmaker::new(Gamemode::new("duel", 2, 1), fx.pool.clone(), fx.tokens.clone());
        let (first, mut rx_a) = join(&mm);
        let (_, mut rx_b) = join(&mm);

        assert_eq!(mm.fill_check(), FillOutcome::Exhausted);
        assert_eq!(mm.queue_len(), 2);
        assert!(fx.tokens.is_empty());

        // Enough players, no room yet: both still hear about the queue
        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(
                rx.try_recv().unwrap(),
                LobbyServerMsg::QueueStatus { count: 2, enough: true }
            );
        }

        // Still first in line for the retry
        assert!(mm.remove_player(first));
        assert_eq!(mm.queue_len(), 1);
        fx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn fill_takes_only_what_the_gamemode_needs() {
        let fx = fixture(2, 2);
        let mm = Matchmaker::new(Gamemode::new("duel", 2, 1), fx.pool.clone(), fx.tokens.clone());
        for _ in 0..5 {
            join(&mm);
        }

        assert!(matches!(mm.fill_check(), FillOutcome::Filled { .. }));
        assert_eq!(mm.queue_len(), 3);
        assert!(matches!(mm.fill_check(), FillOutcome::Filled { .. }));
        assert_eq!(mm.queue_len(), 1);
        assert_eq!(mm.fill_check(), FillOutcome::Waiting { queued: 1 });
        assert_eq!(fx.pool.game_count(), 2);
        fx.pool.shutdown().await;
    }

    #[tokio::test]
    async fn service_rejects_unknown_gamemode() {
        let fx = fixture(1, 1);
        let service = MatchmakingService::new(gamemode::builtin(), fx.pool.clone(), fx.tokens.clone());

        assert!(service.get("duel").is_ok());
        assert!(matches!(
            service.get("battle-royale"),
            Err(MatchmakingError::InvalidGamemode(code)) if code == "battle-royale"
        ));
        let codes: Vec<String> = service.queue_lengths().into_iter().map(|(c, _)| c).collect();
        assert_eq!(codes.first().map(String::as_str), Some("duel"));
        assert_eq!(codes.len(), gamemode::builtin().len());
    }

    #[tokio::test]
    async fn started_matchmaker_fills_on_its_own() {
        let fx = fixture(1, 1);
        let mm = Arc::new(Matchmaker::new(Gamemode::new("duel", 2, 1), fx.pool.clone(), fx.tokens.clone()));
        let (_, mut rx_a) = join(&mm);
        let (_, _rx_b) = join(&mm);

        let cancel = CancellationToken::new();
        let handle = mm.start(Duration::from_millis(10), cancel.clone());
        let matched = tokio::time::timeout(Duration::from_secs(1), rx_a.recv()).await.unwrap();
        assert!(matches!(matched, Some(LobbyServerMsg::Matched { .. })));

        cancel.cancel();
        handle.await.unwrap();
        fx.pool.shutdown().await;
    }
}
