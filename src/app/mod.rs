//! Application wiring

mod state;

pub use state::{spawn_reaper, spawn_token_sweeper, AppState};
