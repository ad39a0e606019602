//! URL-keyed, TTL-expiring content cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{cache_key, CacheEntry, CacheStore, InMemoryCacheStore};
use crate::utils::{add_duration, system_clock, Clock};

/// Cache of prior fetch bodies.
///
/// Reads fail closed: a store error is reported as a miss. Writes that fail
/// are logged and dropped.
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ContentCache {
    /// Creates a cache over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, default_ttl: Duration) -> Self {
        Self::with_clock(store, default_ttl, system_clock())
    }

    /// Creates a cache backed by a fresh in-memory store.
    #[must_use]
    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryCacheStore::new()), default_ttl)
    }

    /// Creates a cache that reads time from `clock`.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn CacheStore>,
        default_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            default_ttl,
            clock,
        }
    }

    /// Returns the TTL used when none is given.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Looks up a servable entry for `url`, counting the hit.
    pub async fn get(&self, url: &str) -> Option<CacheEntry> {
        let key = cache_key(url);
        let now = self.clock.now();

        match self.store.get_and_record_hit(&key, now).await {
            Ok(Some(entry)) => {
                debug!(url, hits = entry.hit_count, "Cache hit");
                Some(entry)
            }
            Ok(None) => {
                debug!(url, "Cache miss");
                None
            }
            Err(e) => {
                warn!(url, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Stores a body for `url`, replacing any existing entry.
    ///
    /// `ttl` defaults to the cache's default TTL. The expiry is fixed at
    /// write time.
    pub async fn put(
        &self,
        url: &str,
        body: impl Into<String>,
        status_code: u16,
        headers: BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) {
        let body = body.into();
        let now = self.clock.now();
        let entry = CacheEntry {
            key: cache_key(url),
            url: url.to_string(),
            content_length: body.len(),
            body,
            status_code,
            headers,
            cached_at: now,
            expires_at: add_duration(now, ttl.unwrap_or(self.default_ttl)),
            hit_count: 0,
            valid: true,
        };

        if let Err(e) = self.store.put(entry).await {
            warn!(url, error = %e, "Cache write failed");
        }
    }

    /// Marks the entry for `url` invalid so it is no longer served.
    pub async fn invalidate(&self, url: &str) -> bool {
        match self.store.invalidate(&cache_key(url)).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(url, error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    /// Removes expired and invalid entries.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge(self.clock.now()).await {
            Ok(removed) => {
                debug!(removed, "Purged cache entries");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Cache purge failed");
                0
            }
        }
    }

    /// Returns the number of stored entries, servable or not.
    pub async fn len(&self) -> usize {
        self.store.len().await.unwrap_or(0)
    }

    /// Returns true if the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
