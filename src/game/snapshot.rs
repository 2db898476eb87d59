//! Encoded instance state and snapshot pacing

use serde::{Deserialize, Serialize};

use crate::util::ids::{GameId, PlayerId, TeamId};

/// Full encoded state of one game instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub game_id: GameId,
    /// Frames simulated so far
    pub frames: u64,
    pub teams: Vec<TeamSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub id: TeamId,
    pub players: Vec<PlayerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
    /// Heading in radians
    pub direction: f32,
    pub living: bool,
    pub is_boosting: bool,
    /// 0..=1, see `Player::boost_level`
    pub boost_level: f32,
}

/// Decides which ticks produce a broadcast snapshot
#[derive(Debug, Clone)]
pub struct SnapshotPacer {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotPacer {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }
}
