//! Per-batch fetch options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_duration;
use super::{EngineSettings, MAX_CONCURRENCY};
use crate::errors::ConfigError;

/// How a single request interacts with the content cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Serve from cache when possible and store successful bodies.
    #[default]
    Use,
    /// Skip the cache read but store the fresh body (forced re-fetch).
    Refresh,
    /// Neither read nor write the cache.
    Bypass,
}

impl CachePolicy {
    /// Whether a cached body may be served.
    #[must_use]
    pub fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    /// Whether a fresh body should be stored.
    #[must_use]
    pub fn writes(self) -> bool {
        matches!(self, Self::Use | Self::Refresh)
    }
}

/// Options recognized by [`Scheduler::fetch_all`](crate::scheduler::Scheduler::fetch_all).
///
/// Missing keys take engine defaults; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchOptions {
    /// Maximum number of in-flight fetches.
    pub max_concurrency: usize,
    /// Whether the content cache is consulted and populated.
    pub use_cache: bool,
    /// Time-to-live of entries written by this batch, in seconds.
    #[serde(with = "serde_duration::secs")]
    pub cache_ttl: Duration,
    /// Whether redirects are followed.
    pub follow_redirects: bool,
    /// Per-fetch deadline, in milliseconds.
    #[serde(with = "serde_duration::millis")]
    pub request_timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}

impl FetchOptions {
    /// Creates options with engine defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives batch options from engine settings.
    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_concurrency: settings.default_concurrency,
            use_cache: true,
            cache_ttl: settings.cache_ttl,
            follow_redirects: settings.follow_redirects,
            request_timeout: settings.request_timeout,
        }
    }

    /// Sets the maximum concurrency.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Enables or disables the cache.
    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Sets the cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Enables or disables redirect following.
    #[must_use]
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Sets the per-fetch deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Cache policy applied to every request of the batch.
    #[must_use]
    pub fn cache_policy(&self) -> CachePolicy {
        if self.use_cache {
            CachePolicy::Use
        } else {
            CachePolicy::Bypass
        }
    }

    /// Rejects values that cannot be honored.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::must_be_positive("max_concurrency"));
        }
        if self.max_concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::too_large("max_concurrency", MAX_CONCURRENCY));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::must_be_positive("request_timeout"));
        }
        Ok(())
    }
}
