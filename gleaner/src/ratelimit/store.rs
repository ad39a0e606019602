//! Storage backends for rate-limit state.

use async_trait::async_trait;
use dashmap::DashMap;

use super::RateLimitState;
use crate::errors::StoreError;

/// Key-addressed storage for [`RateLimitState`].
///
/// Implementations only need per-key read and write; the
/// [`RateLimiter`](super::RateLimiter) serializes access per domain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Loads the state for a domain, if any.
    async fn load(&self, domain: &str) -> Result<Option<RateLimitState>, StoreError>;

    /// Saves the state for its domain, replacing any previous value.
    async fn save(&self, state: RateLimitState) -> Result<(), StoreError>;

    /// Lists every domain with stored state.
    async fn domains(&self) -> Result<Vec<String>, StoreError>;
}

/// Process-lifetime in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    states: DashMap<String, RateLimitState>,
}

impl InMemoryRateLimitStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tracked domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns true if no domain is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn load(&self, domain: &str) -> Result<Option<RateLimitState>, StoreError> {
        Ok(self.states.get(domain).map(|s| s.clone()))
    }

    async fn save(&self, state: RateLimitState) -> Result<(), StoreError> {
        self.states.insert(state.domain.clone(), state);
        Ok(())
    }

    async fn domains(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.states.iter().map(|e| e.key().clone()).collect())
    }
}
