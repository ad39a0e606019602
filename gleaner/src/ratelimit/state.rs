//! Per-domain rate-limit state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::utils::{add_duration, Timestamp};

/// Length of the short window.
pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Length of the long window.
pub const HOUR_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Counters, window boundaries and block status for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// The domain this state belongs to.
    pub domain: String,
    /// Requests recorded in the current minute window.
    pub minute_count: u32,
    /// Requests recorded in the current hour window.
    pub hour_count: u32,
    /// When the minute window ends.
    pub minute_reset_at: Timestamp,
    /// When the hour window ends.
    pub hour_reset_at: Timestamp,
    /// Whether the domain is explicitly blocked.
    #[serde(default)]
    pub blocked: bool,
    /// When the block lapses. `None` with `blocked` set means until unblocked.
    pub blocked_until: Option<Timestamp>,
    /// Why the domain was blocked.
    pub block_reason: Option<String>,
    /// Slots handed out by `allow` that have not been recorded yet.
    #[serde(default)]
    pub in_flight: u32,
    /// When the last request was recorded.
    pub last_request_at: Option<Timestamp>,
}

impl RateLimitState {
    /// Creates fresh state whose windows start at `now`.
    #[must_use]
    pub fn new(domain: impl Into<String>, now: Timestamp) -> Self {
        Self {
            domain: domain.into(),
            minute_count: 0,
            hour_count: 0,
            minute_reset_at: add_duration(now, MINUTE_WINDOW),
            hour_reset_at: add_duration(now, HOUR_WINDOW),
            blocked: false,
            blocked_until: None,
            block_reason: None,
            in_flight: 0,
            last_request_at: None,
        }
    }

    /// Resets any window whose boundary has passed.
    ///
    /// The new boundary is `now + window`, not the next aligned boundary.
    /// Returns true if anything changed.
    pub fn roll_windows(&mut self, now: Timestamp) -> bool {
        let mut changed = false;
        if now > self.minute_reset_at {
            self.minute_count = 0;
            self.minute_reset_at = add_duration(now, MINUTE_WINDOW);
            changed = true;
        }
        if now > self.hour_reset_at {
            self.hour_count = 0;
            self.hour_reset_at = add_duration(now, HOUR_WINDOW);
            changed = true;
        }
        changed
    }

    /// Whether the block is in force at `now`.
    #[must_use]
    pub fn is_blocked_at(&self, now: Timestamp) -> bool {
        self.blocked && self.blocked_until.map_or(true, |until| now < until)
    }

    /// Clears a block whose expiry has passed. Returns true if it did.
    pub fn clear_expired_block(&mut self, now: Timestamp) -> bool {
        if self.blocked && !self.is_blocked_at(now) {
            self.blocked = false;
            self.blocked_until = None;
            self.block_reason = None;
            return true;
        }
        false
    }

    /// Whether another request fits under both caps, counting reservations.
    #[must_use]
    pub fn has_capacity(&self, caps: &RateLimitConfig) -> bool {
        self.minute_count.saturating_add(self.in_flight) < caps.per_minute
            && self.hour_count.saturating_add(self.in_flight) < caps.per_hour
    }

    /// Remaining requests in the current minute window.
    #[must_use]
    pub fn remaining_this_minute(&self, caps: &RateLimitConfig) -> u32 {
        caps.per_minute
            .saturating_sub(self.minute_count.saturating_add(self.in_flight))
    }
}
