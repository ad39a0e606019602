//! Engine-wide settings loaded once at startup.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::serde_duration;
use crate::errors::{ConfigError, EngineError};

/// Largest accepted concurrency, bounded by the batch semaphore.
pub const MAX_CONCURRENCY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "GLEANER_";

/// Per-domain request caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum requests per domain within one minute window.
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    /// Maximum requests per domain within one hour window.
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
}

fn default_per_minute() -> u32 {
    10
}

fn default_per_hour() -> u32 {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
        }
    }
}

impl RateLimitConfig {
    /// Creates caps with the given values.
    #[must_use]
    pub fn new(per_minute: u32, per_hour: u32) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }

    /// Rejects zero caps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_minute == 0 {
            return Err(ConfigError::must_be_positive("rate_limit.per_minute"));
        }
        if self.per_hour == 0 {
            return Err(ConfigError::must_be_positive("rate_limit.per_hour"));
        }
        Ok(())
    }
}

/// Settings for the whole engine.
///
/// Loaded from defaults, an optional TOML file and `GLEANER_*` environment
/// variables (nested keys separated by `__`, e.g. `GLEANER_RATE_LIMIT__PER_MINUTE`).
/// Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Default number of in-flight fetches per batch.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    /// Default per-domain caps.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Whether egress proxies are used at all.
    #[serde(default)]
    pub proxy_enabled: bool,
    /// Default cache time-to-live, in seconds.
    #[serde(default = "default_cache_ttl", with = "serde_duration::secs")]
    pub cache_ttl: Duration,
    /// Default per-fetch deadline, in milliseconds.
    #[serde(default = "default_request_timeout", with = "serde_duration::millis")]
    pub request_timeout: Duration,
    /// TCP connect deadline, in milliseconds.
    #[serde(default = "default_connect_timeout", with = "serde_duration::millis")]
    pub connect_timeout: Duration,
    /// Whether redirects are followed by default.
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    /// Maximum number of redirects to follow.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Whether to send a randomly chosen browser User-Agent per request.
    #[serde(default = "default_true")]
    pub rotate_user_agent: bool,
    /// User agent used when rotation is disabled.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Bodies larger than this are treated as transport failures.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Consecutive transport failures before a proxy is blocked for a domain.
    #[serde(default = "default_proxy_failure_threshold")]
    pub proxy_failure_threshold: u32,
    /// How long a domain is blocked after a 429 without `Retry-After`, in seconds.
    #[serde(default = "default_rate_limit_cooldown", with = "serde_duration::secs")]
    pub rate_limit_cooldown: Duration,
}

fn default_concurrency() -> usize {
    10
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    concat!("gleaner/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_response_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_proxy_failure_threshold() -> u32 {
    3
}

fn default_rate_limit_cooldown() -> Duration {
    Duration::from_secs(60)
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            rate_limit: RateLimitConfig::default(),
            proxy_enabled: false,
            cache_ttl: default_cache_ttl(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            follow_redirects: true,
            max_redirects: default_max_redirects(),
            rotate_user_agent: true,
            user_agent: default_user_agent(),
            max_response_bytes: default_max_response_bytes(),
            proxy_failure_threshold: default_proxy_failure_threshold(),
            rate_limit_cooldown: default_rate_limit_cooldown(),
        }
    }
}

impl EngineSettings {
    /// Creates settings with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from defaults, an optional TOML file and the environment.
    ///
    /// Later layers override earlier ones. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        settings.validate()?;
        tracing::debug!(?settings, "Loaded engine settings");
        Ok(settings)
    }

    /// Rejects values that would make the engine unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_concurrency == 0 {
            return Err(ConfigError::must_be_positive("default_concurrency"));
        }
        if self.default_concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::too_large("default_concurrency", MAX_CONCURRENCY));
        }
        self.rate_limit.validate()?;
        if self.request_timeout.is_zero() {
            return Err(ConfigError::must_be_positive("request_timeout"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::must_be_positive("connect_timeout"));
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::must_be_positive("max_response_bytes"));
        }
        if self.proxy_failure_threshold == 0 {
            return Err(ConfigError::must_be_positive("proxy_failure_threshold"));
        }
        Ok(())
    }

    /// Sets the default concurrency.
    #[must_use]
    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = concurrency;
        self
    }

    /// Sets the per-domain caps.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Enables or disables proxies.
    #[must_use]
    pub fn with_proxy_enabled(mut self, enabled: bool) -> Self {
        self.proxy_enabled = enabled;
        self
    }

    /// Sets the default cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the default request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets a fixed user agent and disables rotation.
    #[must_use]
    pub fn with_fixed_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self.rotate_user_agent = false;
        self
    }

    /// Sets the maximum accepted body size.
    #[must_use]
    pub fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    /// Sets the proxy failure threshold.
    #[must_use]
    pub fn with_proxy_failure_threshold(mut self, threshold: u32) -> Self {
        self.proxy_failure_threshold = threshold;
        self
    }

    /// Sets the cooldown applied after a 429 without `Retry-After`.
    #[must_use]
    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }
}
