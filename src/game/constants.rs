//! Gameplay tuning constants

/// How long a boost lasts (seconds)
pub const BOOST_DURATION: f32 = 1.5;
/// Recharge time after a boost ends (seconds)
pub const BOOST_COOLDOWN: f32 = 5.0;

/// Per-tick propulsion while boosting
pub const BOOST_FORCE: f32 = 50.0;
/// Per-tick propulsion otherwise
pub const NORMAL_FORCE: f32 = 25.0;

/// Friction deceleration per second (scaled by mass)
pub const FRICTION: f32 = 20.0;

pub const MAX_SPEED: f32 = 250.0;
pub const BOOST_MAX_SPEED: f32 = 600.0;
pub const BRAKE_MAX_SPEED: f32 = 100.0;
pub const DEAD_MAX_SPEED: f32 = 1500.0;
/// Below this speed friction stops a body outright
pub const MIN_SPEED: f32 = 5.0;

pub const PLAYER_MASS: f32 = 1.0;

// Arena dimensions
pub const ARENA_WIDTH: f32 = 1000.0;
pub const ARENA_HEIGHT: f32 = 500.0;
pub const ARENA_THICKNESS: f32 = 100.0;

// Truck hitboxes, approximated by circles along the heading axis
pub const TRUCK_PLOW_OFFSET: f32 = 10.0;
pub const TRUCK_PLOW_RADIUS: f32 = 12.0;
pub const TRUCK_CORE_OFFSET: f32 = -15.0;
pub const TRUCK_CORE_RADIUS: f32 = 9.0;

pub const PLOW_ELASTICITY: f32 = 1.5;
pub const CORE_ELASTICITY: f32 = 5.0;
pub const BORDER_ELASTICITY: f32 = 0.8;
/// Restitution between a dead body and the arena border
pub const DEAD_BORDER_RESTITUTION: f32 = 0.1;
