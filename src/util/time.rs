//! Time utilities

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Number of `tick_period` ticks that make up one `broadcast_period` (at least 1)
pub fn ticks_per(broadcast_period: Duration, tick_period: Duration) -> u32 {
    if tick_period.is_zero() {
        return 1;
    }
    let ratio = broadcast_period.as_secs_f64() / tick_period.as_secs_f64();
    (ratio.round() as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_interval_in_ticks() {
        assert_eq!(ticks_per(Duration::from_millis(50), Duration::from_millis(16)), 3);
        assert_eq!(ticks_per(Duration::from_millis(10), Duration::from_millis(16)), 1);
        assert_eq!(ticks_per(Duration::from_millis(50), Duration::ZERO), 1);
    }
}
