//! Error types for the gleaner engine.
//!
//! Per-URL failures are never errors in the Rust sense: they are captured in
//! [`FetchResult`](crate::fetch::FetchResult) as an [`ErrorKind`]. The types in
//! this module cover what can fail synchronously (configuration, client
//! construction) and what storage backends report to their owning component.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid configuration was supplied.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A state store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Settings could not be loaded.
    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Client(err.to_string())
    }
}

impl From<figment::Error> for EngineError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(err.to_string())
    }
}

/// Error raised when a configuration value is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid configuration for '{field}': {message}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a value that must be strictly positive.
    #[must_use]
    pub fn must_be_positive(field: impl Into<String>) -> Self {
        Self::new(field, "must be greater than zero")
    }

    /// Shorthand for a value above its upper bound.
    #[must_use]
    pub fn too_large(field: impl Into<String>, max: usize) -> Self {
        Self::new(field, format!("must be at most {max}"))
    }
}

/// Errors reported by rate-limit and cache storage backends.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("Corrupt store entry '{key}': {reason}")]
    Corrupt {
        /// The entry key.
        key: String,
        /// Why decoding failed.
        reason: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Creates a corrupt entry error.
    #[must_use]
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single fetch did not succeed.
///
/// The caller uses this to decide whether to retry, skip or blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ErrorKind {
    /// The domain is over budget or explicitly blocked.
    RateLimited,
    /// Connection, DNS, TLS or body read failure.
    Transport,
    /// The per-fetch deadline was exceeded.
    Timeout,
    /// A non-2xx response was received.
    Http(u16),
    /// The batch was cancelled before this URL was dispatched.
    Cancelled,
    /// The URL could not be parsed or has no host.
    InvalidUrl,
}

impl ErrorKind {
    /// Whether retrying later could plausibly succeed.
    ///
    /// HTTP errors are retryable only for 408, 425, 429 and 5xx.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited | Self::Transport | Self::Timeout => true,
            Self::Http(status) => matches!(status, 408 | 425 | 429 | 500..=599),
            Self::Cancelled | Self::InvalidUrl => false,
        }
    }

    /// Short stable name for logs and session records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Http(_) => "http_error",
            Self::Cancelled => "cancelled",
            Self::InvalidUrl => "invalid_url",
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.as_str()));
        if let Self::Http(status) = self {
            map.insert("status".to_string(), serde_json::json!(status));
        }
        map.insert("retryable".to_string(), serde_json::json!(self.is_retryable()));
        map
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(status) => write!(f, "HTTP {status}"),
            Self::RateLimited => f.write_str("Rate limited"),
            Self::Transport => f.write_str("Transport error"),
            Self::Timeout => f.write_str("Request timeout"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::InvalidUrl => f.write_str("Invalid URL"),
        }
    }
}
