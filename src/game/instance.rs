//! Game instance state and the fixed-step simulation

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::util::ids::{new_id, GameId, PlayerId, TeamId};

use super::constants::*;
use super::physics::{
    Arbiter, ArenaSpace, Body, BodyHandle, CollisionType, PhysicsWorld, Shape, Vec2,
};
use super::snapshot::{InstanceSnapshot, PlayerSnapshot, TeamSnapshot};

/// Which speed ceiling applies to a player this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    Dead,
    Boosting,
    Braking,
    Normal,
}

impl Motion {
    pub fn max_speed(self) -> f32 {
        match self {
            Motion::Dead => DEAD_MAX_SPEED,
            Motion::Boosting => BOOST_MAX_SPEED,
            Motion::Braking => BRAKE_MAX_SPEED,
            Motion::Normal => MAX_SPEED,
        }
    }
}

/// A single truck, dead or alive
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub body: BodyHandle,
    living: bool,
    /// Simulation time the last boost began, if ever
    boost_started: Option<f32>,
    pub braking: bool,
}

impl Player {
    fn new(id: PlayerId, body: BodyHandle) -> Self {
        Self {
            id,
            body,
            living: true,
            boost_started: None,
            braking: false,
        }
    }

    pub fn is_living(&self) -> bool {
        self.living
    }

    /// alive -> dead. Returns true only on the transition itself.
    pub fn kill(&mut self) -> bool {
        let was_living = self.living;
        self.living = false;
        was_living
    }

    pub fn is_boosting(&self, now: f32) -> bool {
        self.boost_started
            .map(|start| start + BOOST_DURATION > now)
            .unwrap_or(false)
    }

    /// 1.0 when charged; falls to 0 over a boost, then recharges over the cooldown
    pub fn boost_level(&self, now: f32) -> f32 {
        let Some(start) = self.boost_started else {
            return 1.0;
        };
        if self.is_boosting(now) {
            1.0 - ((now - start) / BOOST_DURATION).min(1.0)
        } else {
            ((now - (start + BOOST_DURATION)) / BOOST_COOLDOWN).clamp(0.0, 1.0)
        }
    }

    /// Begin a boost if fully charged. Returns whether the boost started.
    pub fn try_boost(&mut self, now: f32) -> bool {
        if !self.living || self.boost_level(now) < 1.0 {
            return false;
        }
        self.boost_started = Some(now);
        true
    }

    pub fn motion(&self, now: f32) -> Motion {
        if !self.living {
            Motion::Dead
        } else if self.is_boosting(now) {
            Motion::Boosting
        } else if self.braking {
            Motion::Braking
        } else {
            Motion::Normal
        }
    }
}

/// A group of players fighting together
#[derive(Debug, Clone)]
pub struct Team {
    pub id: TeamId,
    /// Position of this team in the instance, used as the physics group
    pub index: u32,
    pub players: Vec<Player>,
}

impl Team {
    fn new(index: u32) -> Self {
        Self {
            id: new_id(),
            index,
            players: Vec::new(),
        }
    }

    /// Spawn a truck at a random spot in the arena facing a random direction
    pub fn create_player(&mut self, space: &mut dyn PhysicsWorld, rng: &mut ChaCha8Rng) -> &Player {
        let position = Vec2::new(
            rng.gen_range(0.0..ARENA_WIDTH),
            rng.gen_range(0.0..ARENA_HEIGHT),
        );
        let heading = rng.gen_range(0.0..std::f32::consts::TAU);

        let body = Body::dynamic(PLAYER_MASS, position, heading, self.index)
            .with_shape(Shape::circle(
                Vec2::new(TRUCK_PLOW_OFFSET, 0.0),
                TRUCK_PLOW_RADIUS,
                CollisionType::Plow,
                PLOW_ELASTICITY,
            ))
            .with_shape(Shape::circle(
                Vec2::new(TRUCK_CORE_OFFSET, 0.0),
                TRUCK_CORE_RADIUS,
                CollisionType::Core,
                CORE_ELASTICITY,
            ));
        let handle = space.add_body(body);

        self.players.push(Player::new(new_id(), handle));
        &self.players[self.players.len() - 1]
    }

    pub fn has_living(&self) -> bool {
        self.players.iter().any(Player::is_living)
    }
}

/// Things that happened during a tick that connections care about
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    PlayerDied { player_id: PlayerId, team_id: TeamId },
}

/// Per-player steering input
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerInput {
    /// New heading in radians, if the player turned
    pub direction: Option<f32>,
    pub boost: bool,
    pub brake: bool,
}

/// Lookup failures inside an instance
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Player {0} is not in this game")]
    UnknownPlayer(PlayerId),
}

/// One simulated session: teams of trucks in a walled arena
pub struct GameInstance {
    pub id: GameId,
    pub seed: u64,
    pub teams: Vec<Team>,
    space: Box<dyn PhysicsWorld>,
    frames: u64,
    /// Simulated seconds since creation
    clock: f32,
    rng: ChaCha8Rng,
}

impl GameInstance {
    /// Create an instance in the standard walled arena
    pub fn new(id: GameId, seed: u64) -> Self {
        let mut space = ArenaSpace::new();
        build_arena(&mut space);
        Self::with_world(id, seed, Box::new(space))
    }

    /// Create an instance on a caller-supplied world. Collision handlers are registered here.
    pub fn with_world(id: GameId, seed: u64, mut space: Box<dyn PhysicsWorld>) -> Self {
        register_handlers(space.as_mut());
        Self {
            id,
            seed,
            teams: Vec::new(),
            space,
            frames: 0,
            clock: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn clock(&self) -> f32 {
        self.clock
    }

    pub fn create_team(&mut self) -> &mut Team {
        let index = self.teams.len() as u32;
        self.teams.push(Team::new(index));
        let last = self.teams.len() - 1;
        &mut self.teams[last]
    }

    /// Spawn a player on the team at `team_index`
    pub fn create_player(&mut self, team_index: usize) -> Option<PlayerId> {
        let team = self.teams.get_mut(team_index)?;
        let player = team.create_player(self.space.as_mut(), &mut self.rng);
        Some(player.id.clone())
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.teams.iter().flat_map(|t| t.players.iter())
    }

    pub fn player_count(&self) -> usize {
        self.teams.iter().map(|t| t.players.len()).sum()
    }

    pub fn get_player(&self, player_id: &str) -> Option<&Player> {
        self.players().find(|p| p.id == player_id)
    }

    fn get_player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.teams
            .iter_mut()
            .flat_map(|t| t.players.iter_mut())
            .find(|p| p.id == player_id)
    }

    /// Team that owns `player_id`
    pub fn team_of(&self, player_id: &str) -> Option<&Team> {
        self.teams
            .iter()
            .find(|t| t.players.iter().any(|p| p.id == player_id))
    }

    pub fn body(&self, player: &Player) -> Option<&Body> {
        self.space.body(player.body)
    }

    /// Move a player's truck (spawn overrides, tests)
    pub fn place_player(&mut self, player_id: &str, position: Vec2, heading: f32) -> Result<(), GameError> {
        let handle = self
            .get_player(player_id)
            .map(|p| p.body)
            .ok_or_else(|| GameError::UnknownPlayer(player_id.to_string()))?;
        if let Some(body) = self.space.body_mut(handle) {
            body.position = position;
            body.angle = heading;
            body.velocity = Vec2::ZERO;
        }
        Ok(())
    }

    /// Apply steering input. Dead players ignore it.
    pub fn apply_input(&mut self, player_id: &str, input: PlayerInput) -> Result<(), GameError> {
        let now = self.clock;
        let player = self
            .get_player_mut(player_id)
            .ok_or_else(|| GameError::UnknownPlayer(player_id.to_string()))?;
        if !player.is_living() {
            return Ok(());
        }

        player.braking = input.brake;
        if input.boost {
            player.try_boost(now);
        }
        let handle = player.body;

        if let Some(direction) = input.direction {
            if let Some(body) = self.space.body_mut(handle) {
                body.angle = direction;
            }
        }
        Ok(())
    }

    /// Advance the simulation by `dt` seconds
    pub fn update(&mut self, dt: f32) -> Vec<GameEvent> {
        let now = self.clock;

        // Propulsion
        for player in self.teams.iter().flat_map(|t| t.players.iter()) {
            if !player.is_living() {
                continue;
            }
            let force = if player.is_boosting(now) { BOOST_FORCE } else { NORMAL_FORCE };
            if let Some(body) = self.space.body_mut(player.body) {
                let push = Vec2::from_angle(body.angle) * (force / body.mass);
                body.velocity += push;
                body.angular_velocity = 0.0;
            }
        }

        // Friction stops a body rather than reversing it
        for player in self.teams.iter().flat_map(|t| t.players.iter()) {
            let Some(body) = self.space.body_mut(player.body) else {
                continue;
            };
            let speed = body.speed();
            let slowdown = FRICTION * dt;
            if speed < MIN_SPEED || slowdown >= speed {
                body.velocity = Vec2::ZERO;
            } else {
                body.velocity = body.velocity.normalized() * (speed - slowdown);
            }
        }
        self.limit_speeds(now);

        let struck = self.space.step(dt);
        self.frames += 1;
        self.clock += dt;

        let mut events = Vec::new();
        for team in &mut self.teams {
            for player in &mut team.players {
                if struck.contains(&player.body) && player.kill() {
                    debug!(game_id = %self.id, player_id = %player.id, "Player died");
                    events.push(GameEvent::PlayerDied {
                        player_id: player.id.clone(),
                        team_id: team.id.clone(),
                    });
                }
            }
        }

        // Contacts can push bodies past their ceiling; deaths change which one applies
        self.limit_speeds(self.clock);

        if !events.is_empty() && self.is_finished() {
            info!(game_id = %self.id, frames = self.frames, "Game decided");
        }

        events
    }

    /// Clamp every body to the ceiling of its player's state at `now`
    fn limit_speeds(&mut self, now: f32) {
        for player in self.teams.iter().flat_map(|t| t.players.iter()) {
            let ceiling = player.motion(now).max_speed();
            if let Some(body) = self.space.body_mut(player.body) {
                if body.speed() > ceiling {
                    body.velocity = body.velocity.normalized() * ceiling;
                }
            }
        }
    }

    /// True once at most one of several teams still has a living player
    pub fn is_finished(&self) -> bool {
        self.teams.len() >= 2 && self.teams.iter().filter(|t| t.has_living()).count() <= 1
    }

    /// The only team with living players, once the game is finished
    pub fn winning_team(&self) -> Option<&Team> {
        if !self.is_finished() {
            return None;
        }
        self.teams.iter().find(|t| t.has_living())
    }

    /// Encode frame count and per-player state
    pub fn get_encoded(&self) -> InstanceSnapshot {
        let now = self.clock;
        InstanceSnapshot {
            game_id: self.id.clone(),
            frames: self.frames,
            teams: self
                .teams
                .iter()
                .map(|team| TeamSnapshot {
                    id: team.id.clone(),
                    players: team
                        .players
                        .iter()
                        .map(|p| {
                            let (position, direction) = self
                                .space
                                .body(p.body)
                                .map(|b| (b.position, b.angle))
                                .unwrap_or((Vec2::ZERO, 0.0));
                            PlayerSnapshot {
                                id: p.id.clone(),
                                x: position.x,
                                y: position.y,
                                direction,
                                living: p.is_living(),
                                is_boosting: p.is_boosting(now),
                                boost_level: p.boost_level(now),
                            }
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Collision policy: enemy plows and dead bodies kill cores; dead bodies bounce softly off walls
fn register_handlers(space: &mut dyn PhysicsWorld) {
    space.register_collision_handler(
        CollisionType::Plow,
        CollisionType::Core,
        Box::new(|arb| {
            let (plow, core) = (arb.first, arb.second);
            if arb.body(plow).group != arb.body(core).group {
                kill(arb, core);
            }
            true
        }),
    );

    space.register_collision_handler(
        CollisionType::DeadBody,
        CollisionType::Core,
        Box::new(|arb| {
            let core = arb.second;
            kill(arb, core);
            true
        }),
    );

    space.register_collision_handler(
        CollisionType::ArenaBorder,
        CollisionType::DeadBody,
        Box::new(|arb| {
            arb.set_restitution(DEAD_BORDER_RESTITUTION);
            true
        }),
    );
}

fn kill(arb: &mut Arbiter<'_>, victim: BodyHandle) {
    arb.body_mut(victim).reclassify(CollisionType::DeadBody);
    arb.flag(victim);
}

/// Four static walls just outside `[0, ARENA_WIDTH] x [0, ARENA_HEIGHT]`
fn build_arena(space: &mut dyn PhysicsWorld) {
    let t = ARENA_THICKNESS;
    let wall = |center: Vec2, w: f32, h: f32| {
        Shape::rect(center, w, h, CollisionType::ArenaBorder, BORDER_ELASTICITY)
    };

    let body = Body::fixed()
        .with_shape(wall(Vec2::new(ARENA_WIDTH / 2.0, -t / 2.0), ARENA_WIDTH + 2.0 * t, t))
        .with_shape(wall(Vec2::new(ARENA_WIDTH / 2.0, ARENA_HEIGHT + t / 2.0), ARENA_WIDTH + 2.0 * t, t))
        .with_shape(wall(Vec2::new(-t / 2.0, ARENA_HEIGHT / 2.0), t, ARENA_HEIGHT + 2.0 * t))
        .with_shape(wall(Vec2::new(ARENA_WIDTH + t / 2.0, ARENA_HEIGHT / 2.0), t, ARENA_HEIGHT + 2.0 * t));
    space.add_body(body);
}
