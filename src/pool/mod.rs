//! Worker pool: allocates game instances across a bounded set of clusters

pub mod cluster;

pub use cluster::Cluster;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::game::{GameInstance, InstanceSnapshot};
use crate::util::ids::{new_id, GameId};
use crate::util::scheduler::LoopThread;
use crate::util::time::ticks_per;
use crate::ws::protocol::SessionServerMsg;

/// Pool sizing and timing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Most clusters the pool will ever start
    pub thread_limit: usize,
    /// Most instances one cluster hosts
    pub games_per_thread: usize,
    /// Cluster tick period
    pub update_period: Duration,
    /// How often each game broadcasts a snapshot
    pub transmission_period: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            thread_limit: 4,
            games_per_thread: 5,
            update_period: Duration::from_millis(16),
            transmission_period: Duration::from_millis(50),
        }
    }
}

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("No free game slot in any cluster")]
    ResourceExhausted,

    #[error("Game not found: {0}")]
    NotFound(GameId),

    #[error("Game {0} is registered but its cluster does not host it")]
    InvariantViolation(GameId),

    #[error("Worker pool is shutting down")]
    ShuttingDown,
}

/// Reference to a live game and the cluster that owns it
#[derive(Debug, Clone)]
pub struct GameHandle {
    pub id: GameId,
    pub cluster: Arc<Cluster>,
}

impl GameHandle {
    /// Run `f` on the instance from outside the tick loop
    pub fn with_instance<R>(&self, f: impl FnOnce(&mut GameInstance) -> R) -> Result<R, PoolError> {
        self.cluster
            .with_instance(&self.id, f)
            .ok_or_else(|| PoolError::NotFound(self.id.clone()))
    }

    pub fn subscribe(&self) -> Result<broadcast::Receiver<SessionServerMsg>, PoolError> {
        self.cluster
            .subscribe(&self.id)
            .ok_or_else(|| PoolError::NotFound(self.id.clone()))
    }

    pub fn encoded(&self) -> Result<InstanceSnapshot, PoolError> {
        self.with_instance(|game| game.get_encoded())
    }
}

struct ClusterSlot {
    cluster: Arc<Cluster>,
    thread: Option<LoopThread>,
}

/// Owns every cluster and the game id -> cluster registry
pub struct WorkerPool {
    config: PoolConfig,
    clusters: Mutex<Vec<ClusterSlot>>,
    registry: DashMap<GameId, Arc<Cluster>>,
    ended_tx: mpsc::UnboundedSender<GameId>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create an empty pool. The receiver yields ids of games that finished or faulted.
    pub fn new(config: PoolConfig) -> (Self, mpsc::UnboundedReceiver<GameId>) {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let pool = Self {
            config,
            clusters: Mutex::new(Vec::new()),
            registry: DashMap::new(),
            ended_tx,
            cancel: CancellationToken::new(),
        };
        (pool, ended_rx)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Most games the pool can ever host at once
    pub fn capacity(&self) -> usize {
        self.config.thread_limit * self.config.games_per_thread
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.lock().len()
    }

    pub fn game_count(&self) -> usize {
        self.registry.len()
    }

    /// Create a game in the first cluster with room, starting a new cluster if allowed
    pub fn create_game(&self) -> Result<(GameId, Arc<Cluster>), PoolError> {
        let mut clusters = self.clusters.lock();
        if self.cancel.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }

        let cluster = match clusters.iter().find(|slot| slot.cluster.can_add_game()) {
            Some(slot) => Arc::clone(&slot.cluster),
            None if clusters.len() < self.config.thread_limit => {
                let slot = self.start_cluster(clusters.len())?;
                let cluster = Arc::clone(&slot.cluster);
                clusters.push(slot);
                cluster
            }
            None => {
                debug!(clusters = clusters.len(), "Every cluster is full");
                return Err(PoolError::ResourceExhausted);
            }
        };

        let id = new_id();
        cluster.create_instance(id.clone())?;
        self.registry.insert(id.clone(), Arc::clone(&cluster));

        info!(game_id = %id, cluster = cluster.id, games = self.registry.len(), "Created game");
        Ok((id, cluster))
    }

    fn start_cluster(&self, index: usize) -> Result<ClusterSlot, PoolError> {
        let snapshot_interval = ticks_per(self.config.transmission_period, self.config.update_period);
        let cluster = Arc::new(Cluster::new(
            index,
            self.config.games_per_thread,
            self.config.update_period,
            snapshot_interval,
            self.ended_tx.clone(),
        ));
        let thread = cluster.start(self.cancel.child_token()).map_err(|e| {
            error!(cluster = index, error = %e, "Could not start cluster thread");
            PoolError::ResourceExhausted
        })?;
        Ok(ClusterSlot {
            cluster,
            thread: Some(thread),
        })
    }

    pub fn get_game(&self, id: &str) -> Result<GameHandle, PoolError> {
        self.registry
            .get(id)
            .map(|entry| GameHandle {
                id: id.to_string(),
                cluster: Arc::clone(entry.value()),
            })
            .ok_or_else(|| PoolError::NotFound(id.to_string()))
    }

    /// Remove a game from the registry and from its cluster
    pub fn remove_game(&self, id: &str) -> Result<(), PoolError> {
        let (id, cluster) = self
            .registry
            .remove(id)
            .ok_or_else(|| PoolError::NotFound(id.to_string()))?;

        if !cluster.remove_instance(&id) {
            error!(game_id = %id, cluster = cluster.id, "Registry and cluster contents do not match");
            return Err(PoolError::InvariantViolation(id));
        }

        info!(game_id = %id, cluster = cluster.id, games = self.registry.len(), "Removed game");
        Ok(())
    }

    /// Stop every cluster thread and wait for in-flight ticks to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let threads: Vec<LoopThread> = self
            .clusters
            .lock()
            .iter_mut()
            .filter_map(|slot| slot.thread.take())
            .collect();

        info!(clusters = threads.len(), "Stopping clusters");
        for thread in threads {
            if let Err(e) = thread.join().await {
                error!(error = %e, "Cluster thread ended abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn pool(thread_limit: usize, games_per_thread: usize) -> WorkerPool {
        let (pool, _ended) = WorkerPool::new(PoolConfig {
            thread_limit,
            games_per_thread,
            update_period: Duration::from_millis(10),
            transmission_period: Duration::from_millis(50),
        });
        pool
    }

    #[tokio::test]
    async fn single_slot_pool_refuses_second_game() {
        let pool = pool(1, 1);
        assert_ok!(pool.create_game());
        assert_eq!(pool.create_game().unwrap_err(), PoolError::ResourceExhausted);
        assert_eq!(pool.game_count(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn never_exceeds_thread_limit_times_games_per_thread() {
        let pool = pool(2, 3);
        for _ in 0..pool.capacity() {
            assert_ok!(pool.create_game());
        }
        assert_eq!(pool.create_game().unwrap_err(), PoolError::ResourceExhausted);
        assert_eq!(pool.cluster_count(), 2);
        assert_eq!(pool.game_count(), 6);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn fills_existing_cluster_before_starting_another() {
        let pool = pool(3, 2);
        let (_, first) = pool.create_game().unwrap();
        let (_, second) = pool.create_game().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.cluster_count(), 1);

        let (_, third) = pool.create_game().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(pool.cluster_count(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn removal_frees_the_slot() {
        let pool = pool(1, 1);
        let (id, cluster) = pool.create_game().unwrap();
        assert!(cluster.contains(&id));

        assert_ok!(pool.remove_game(&id));
        assert!(!cluster.contains(&id));
        assert_eq!(pool.get_game(&id).err(), Some(PoolError::NotFound(id.clone())));
        assert_ok!(pool.create_game());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_game_is_not_found() {
        let pool = pool(1, 1);
        assert_eq!(
            pool.get_game("missing").err(),
            Some(PoolError::NotFound("missing".to_string()))
        );
        assert_eq!(
            pool.remove_game("missing").unwrap_err(),
            PoolError::NotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn registry_cluster_mismatch_is_reported() {
        let pool = pool(1, 2);
        let (id, cluster) = pool.create_game().unwrap();
        // Simulate a bug: the cluster forgets the game behind the registry's back
        assert!(cluster.remove_instance(&id));

        assert_eq!(
            pool.remove_game(&id).unwrap_err(),
            PoolError::InvariantViolation(id)
        );
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn games_tick_in_the_background() {
        let pool = pool(1, 1);
        let (id, _) = pool.create_game().unwrap();
        let game = pool.get_game(&id).unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let frames = game.with_instance(|g| g.frames()).unwrap();
        assert!(frames >= 1);

        let snapshot = game.encoded().unwrap();
        assert_eq!(snapshot.game_id, id);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_clusters_and_refuses_new_games() {
        let pool = pool(2, 1);
        let (id, _) = pool.create_game().unwrap();
        assert_ok!(pool.create_game());
        pool.shutdown().await;

        let game = pool.get_game(&id).unwrap();
        let frames = game.with_instance(|g| g.frames()).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(game.with_instance(|g| g.frames()).unwrap(), frames);

        assert_err!(pool.create_game());
    }
}
