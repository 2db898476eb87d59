//! Game simulation modules

pub mod constants;
pub mod instance;
pub mod physics;
pub mod snapshot;

pub use instance::{GameEvent, GameInstance, PlayerInput};
pub use snapshot::InstanceSnapshot;
