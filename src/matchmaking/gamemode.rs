//! Gamemodes: the team shape a queue fills games with

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::game::GameInstance;
use crate::util::ids::{PlayerId, TeamId};

use super::queue::WaitingPlayer;
use super::MatchmakingError;

/// Immutable team shape for one matchmaking queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gamemode {
    pub name: String,
    /// Short code clients ask for, e.g. "duel"
    pub code: String,
    pub team_count: usize,
    pub players_per_team: usize,
}

/// Where a waiting player ended up after a fill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub waiting_id: Uuid,
    pub player_id: PlayerId,
    pub team_id: TeamId,
}

impl Gamemode {
    pub fn new(code: &str, team_count: usize, players_per_team: usize) -> Self {
        let name = if players_per_team == 1 {
            format!("{}p-FFA", team_count)
        } else {
            vec![players_per_team.to_string(); team_count].join("v")
        };
        Self {
            name,
            code: code.to_string(),
            team_count,
            players_per_team,
        }
    }

    pub fn total_players(&self) -> usize {
        self.team_count * self.players_per_team
    }

    /// Build this gamemode's teams in `game` and seat `waiting` in order.
    ///
    /// The player at position `i` joins team `i % team_count`.
    pub fn fill_game<'a>(
        &self,
        game: &mut GameInstance,
        waiting: impl IntoIterator<Item = &'a WaitingPlayer>,
    ) -> Result<Vec<Seat>, MatchmakingError> {
        let waiting: Vec<&WaitingPlayer> = waiting.into_iter().collect();
        if waiting.len() != self.total_players() {
            return Err(MatchmakingError::WrongPlayerCount {
                expected: self.total_players(),
                got: waiting.len(),
            });
        }

        let first_team = game.teams.len();
        for _ in 0..self.team_count {
            game.create_team();
        }

        let mut seats = Vec::with_capacity(waiting.len());
        for (position, player) in waiting.into_iter().enumerate() {
            let team_index = first_team + position % self.team_count;
            let player_id = game
                .create_player(team_index)
                .ok_or(MatchmakingError::MissingTeam(team_index))?;
            seats.push(Seat {
                waiting_id: player.id,
                player_id,
                team_id: game.teams[team_index].id.clone(),
            });
        }
        Ok(seats)
    }
}

impl fmt::Display for Gamemode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// Gamemodes the server offers out of the box
pub fn builtin() -> Vec<Gamemode> {
    vec![
        Gamemode::new("duel", 2, 1),
        Gamemode::new("ffa3", 3, 1),
        Gamemode::new("ffa6", 6, 1),
        Gamemode::new("ffa10", 10, 1),
        Gamemode::new("tdm3", 2, 3),
        Gamemode::new("tdm5", 2, 5),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn waiting(n: usize) -> Vec<WaitingPlayer> {
        (0..n)
            .map(|_| {
                let (tx, _rx) = mpsc::unbounded_channel();
                WaitingPlayer::new("test", tx)
            })
            .collect()
    }

    #[test]
    fn names_follow_team_shape() {
        assert_eq!(Gamemode::new("ffa6", 6, 1).name, "6p-FFA");
        assert_eq!(Gamemode::new("tdm3", 2, 3).name, "3v3");
        assert_eq!(Gamemode::new("tdm5", 2, 5).total_players(), 10);
    }

    #[test]
    fn builtin_codes_are_unique() {
        let modes = builtin();
        let mut codes: Vec<&str> = modes.iter().map(|m| m.code.as_str()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), modes.len());
    }

    #[test]
    fn two_by_three_alternates_teams() {
        let mode = Gamemode::new("tdm3", 2, 3);
        let players = waiting(6);
        let mut game = GameInstance::new("g".into(), 1);

        let seats = mode.fill_game(&mut game, &players).unwrap();

        assert_eq!(game.teams.len(), 2);
        assert_eq!(game.player_count(), 6);
        let team_a: Vec<&PlayerId> = game.teams[0].players.iter().map(|p| &p.id).collect();
        let team_b: Vec<&PlayerId> = game.teams[1].players.iter().map(|p| &p.id).collect();
        assert_eq!(team_a, vec![&seats[0].player_id, &seats[2].player_id, &seats[4].player_id]);
        assert_eq!(team_b, vec![&seats[1].player_id, &seats[3].player_id, &seats[5].player_id]);

        for (seat, player) in seats.iter().zip(&players) {
            assert_eq!(seat.waiting_id, player.id);
        }
        assert_eq!(seats[3].team_id, game.teams[1].id);
    }

    #[test]
    fn refuses_wrong_player_count() {
        let mode = Gamemode::new("duel", 2, 1);
        let players = waiting(3);
        let mut game = GameInstance::new("g".into(), 1);

        assert!(matches!(
            mode.fill_game(&mut game, &players),
            Err(MatchmakingError::WrongPlayerCount { expected: 2, got: 3 })
        ));
        assert!(game.teams.is_empty());
    }
}
