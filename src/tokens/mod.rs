//! Handoff tokens: one-time credentials that move a matched player from the
//! lobby connection to a game session connection.
//!
//! A token is minted per seat when a game is filled. The first redemption binds
//! a session to the seat. One more redemption is accepted inside the grace
//! window so a session that drops right after joining can come back; after that
//! the token is gone.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::util::ids::{new_token, GameId, PlayerId, Token};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Unknown or expired token")]
    NotFound,
}

/// What a redeemed token resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub game_id: GameId,
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Copy)]
enum Redemption {
    Fresh,
    Redeemed { at: Instant },
}

#[derive(Debug, Clone)]
struct TokenEntry {
    binding: Binding,
    state: Redemption,
}

pub struct TokenRegistry {
    entries: DashMap<Token, TokenEntry>,
    grace: Duration,
}

impl TokenRegistry {
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            grace,
        }
    }

    /// Mint a fresh token for a seat
    pub fn mint(&self, game_id: &str, player_id: &str) -> Token {
        let token = new_token();
        self.entries.insert(
            token.clone(),
            TokenEntry {
                binding: Binding {
                    game_id: game_id.to_string(),
                    player_id: player_id.to_string(),
                },
                state: Redemption::Fresh,
            },
        );
        token
    }

    pub fn redeem(&self, token: &str) -> Result<Binding, TokenError> {
        self.redeem_at(token, Instant::now())
    }

    /// Redeem `token` as of `now`
    pub fn redeem_at(&self, token: &str, now: Instant) -> Result<Binding, TokenError> {
        let mut slot = match self.entries.entry(token.to_string()) {
            Entry::Occupied(slot) => slot,
            Entry::Vacant(_) => return Err(TokenError::NotFound),
        };

        let state = slot.get().state;
        match state {
            Redemption::Fresh => {
                slot.get_mut().state = Redemption::Redeemed { at: now };
                Ok(slot.get().binding.clone())
            }
            Redemption::Redeemed { at } if now.saturating_duration_since(at) <= self.grace => {
                let entry = slot.remove();
                debug!(game_id = %entry.binding.game_id, player_id = %entry.binding.player_id, "Token redeemed for reconnect");
                Ok(entry.binding)
            }
            Redemption::Redeemed { .. } => {
                slot.remove();
                Err(TokenError::NotFound)
            }
        }
    }

    /// Drop every token that points into `game_id`
    pub fn invalidate_game(&self, game_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.binding.game_id != game_id);
        before - self.entries.len()
    }

    /// Drop redeemed tokens whose grace window has passed
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.state {
            Redemption::Fresh => true,
            Redemption::Redeemed { at } => now.saturating_duration_since(at) <= self.grace,
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn registry() -> TokenRegistry {
        TokenRegistry::new(Duration::from_secs(10))
    }

    #[test]
    fn fresh_token_resolves_to_its_seat() {
        let tokens = registry();
        let token = tokens.mint("game", "p1");
        let other = tokens.mint("game", "p2");

        assert_eq!(
            tokens.redeem(&token).unwrap(),
            Binding { game_id: "game".into(), player_id: "p1".into() }
        );
        assert_eq!(tokens.redeem(&other).unwrap().player_id, "p2");
    }

    #[test]
    fn unknown_token_is_not_found() {
        let tokens = registry();
        tokens.mint("game", "p1");
        assert_eq!(tokens.redeem("nope").unwrap_err(), TokenError::NotFound);
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn one_reconnect_inside_grace_window() {
        let tokens = registry();
        let token = tokens.mint("game", "p1");
        let start = Instant::now();

        assert_ok!(tokens.redeem_at(&token, start));
        assert_ok!(tokens.redeem_at(&token, start + Duration::from_secs(3)));
        assert_err!(tokens.redeem_at(&token, start + Duration::from_secs(4)));
        assert!(tokens.is_empty());
    }

    #[test]
    fn redemption_after_grace_window_is_not_found() {
        let tokens = registry();
        let token = tokens.mint("game", "p1");
        let start = Instant::now();

        assert_ok!(tokens.redeem_at(&token, start));
        assert_eq!(
            tokens.redeem_at(&token, start + Duration::from_secs(11)).unwrap_err(),
            TokenError::NotFound
        );
        assert_err!(tokens.redeem_at(&token, start + Duration::from_secs(12)));
    }

    #[test]
    fn ended_game_invalidates_its_tokens() {
        let tokens = registry();
        let a = tokens.mint("ended", "p1");
        let b = tokens.mint("ended", "p2");
        let c = tokens.mint("live", "p3");

        assert_eq!(tokens.invalidate_game("ended"), 2);
        assert_err!(tokens.redeem(&a));
        assert_err!(tokens.redeem(&b));
        assert_ok!(tokens.redeem(&c));
    }

    #[test]
    fn purge_keeps_unredeemed_and_recent_tokens() {
        let tokens = registry();
        let start = Instant::now();
        let _fresh = tokens.mint("g", "p1");
        let old = tokens.mint("g", "p2");
        let recent = tokens.mint("g", "p3");
        tokens.redeem_at(&old, start).unwrap();
        tokens.redeem_at(&recent, start + Duration::from_secs(8)).unwrap();

        assert_eq!(tokens.purge_expired(start + Duration::from_secs(15)), 1);
        assert_eq!(tokens.len(), 2);
        assert_ok!(tokens.redeem_at(&recent, start + Duration::from_secs(15)));
    }
}
