//! Per-domain rate limiting.
//!
//! This module provides:
//! - RateLimitState, the counters and block status for one domain
//! - RateLimitStore, the storage seam, with an in-memory implementation
//! - RateLimiter, which enforces minute and hour caps with per-domain locking

mod limiter;
mod state;
mod store;

pub use limiter::{RateLimiter, Reservation};
pub use state::{RateLimitState, HOUR_WINDOW, MINUTE_WINDOW};
pub use store::{InMemoryRateLimitStore, RateLimitStore};

#[cfg(test)]
pub use store::MockRateLimitStore;
