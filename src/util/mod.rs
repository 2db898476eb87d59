//! Shared helpers: identifiers, timing, scheduling and rate limiting

pub mod ids;
pub mod rate_limit;
pub mod scheduler;
pub mod time;
