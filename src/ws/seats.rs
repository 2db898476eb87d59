//! Which session connection currently steers each seat

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::util::ids::{GameId, PlayerId};

type SeatKey = (GameId, PlayerId);

/// At most one live connection per (game, player). A newer claim evicts the older one.
#[derive(Default)]
pub struct ActiveSessions {
    next_claim: AtomicU64,
    seats: DashMap<SeatKey, (u64, CancellationToken)>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the seat for this connection, evicting whichever connection held it
    pub fn claim(self: &Arc<Self>, game_id: &str, player_id: &str) -> SeatClaim {
        let id = self.next_claim.fetch_add(1, Ordering::Relaxed);
        let evicted = CancellationToken::new();
        let key = (game_id.to_string(), player_id.to_string());

        if let Some((_, previous)) = self.seats.insert(key.clone(), (id, evicted.clone())) {
            info!(game_id = %game_id, player_id = %player_id, "Reconnect replaces existing session");
            previous.cancel();
        }

        SeatClaim {
            sessions: Arc::clone(self),
            key,
            id,
            evicted,
        }
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }
}

/// Held by a session for as long as it steers a seat; releases the seat on drop
pub struct SeatClaim {
    sessions: Arc<ActiveSessions>,
    key: SeatKey,
    id: u64,
    evicted: CancellationToken,
}

impl SeatClaim {
    /// Resolves once a newer connection has taken the seat
    pub async fn evicted(&self) {
        self.evicted.cancelled().await
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.is_cancelled()
    }
}

impl Drop for SeatClaim {
    fn drop(&mut self) {
        // Only the current holder clears the seat
        self.sessions.seats.remove_if(&self.key, |_, (owner, _)| *owner == self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn newer_claim_evicts_the_older() {
        let sessions = Arc::new(ActiveSessions::new());
        let first = sessions.claim("game", "p1");
        let other_seat = sessions.claim("game", "p2");
        assert!(!first.is_evicted());

        let second = sessions.claim("game", "p1");
        assert!(first.is_evicted());
        assert!(!second.is_evicted());
        assert!(!other_seat.is_evicted());
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn evicted_claim_does_not_release_the_new_holder() {
        let sessions = Arc::new(ActiveSessions::new());
        let first = sessions.claim("game", "p1");
        let second = sessions.claim("game", "p1");

        drop(first);
        assert_eq!(sessions.len(), 1);

        // The seat is still held, so a third claim still evicts the second
        let third = sessions.claim("game", "p1");
        assert!(second.is_evicted());

        drop(second);
        drop(third);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn eviction_wakes_the_waiting_session() {
        let sessions = Arc::new(ActiveSessions::new());
        let first = sessions.claim("game", "p1");

        let waiter = tokio::spawn(async move {
            first.evicted().await;
        });
        let _second = sessions.claim("game", "p1");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
