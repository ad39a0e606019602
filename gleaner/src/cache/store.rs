//! Storage backends for cache entries.

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheEntry;
use crate::errors::StoreError;
use crate::utils::Timestamp;

/// Key-addressed storage for [`CacheEntry`] values.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Loads an entry by key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Stores an entry, atomically replacing any entry with the same key.
    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Returns an entry servable at `now` with its hit count incremented.
    ///
    /// The servability check and the increment happen as one step, so an
    /// entry replaced or invalidated concurrently is never counted. Returns
    /// `None` for missing, expired or invalid entries.
    async fn get_and_record_hit(
        &self,
        key: &str,
        now: Timestamp,
    ) -> Result<Option<CacheEntry>, StoreError>;

    /// Marks an entry invalid. Returns whether it existed.
    async fn invalidate(&self, key: &str) -> Result<bool, StoreError>;

    /// Removes expired and invalid entries. Returns how many were removed.
    async fn purge(&self, now: Timestamp) -> Result<usize, StoreError>;

    /// Returns the number of stored entries.
    async fn len(&self) -> Result<usize, StoreError>;
}

/// Process-lifetime in-memory cache store.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.entries.get(key).map(|e| e.clone()))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn get_and_record_hit(
        &self,
        key: &str,
        now: Timestamp,
    ) -> Result<Option<CacheEntry>, StoreError> {
        let Some(mut entry) = self.entries.get_mut(key) else {
            return Ok(None);
        };
        if !entry.is_servable_at(now) {
            return Ok(None);
        }
        entry.hit_count += 1;
        Ok(Some(entry.clone()))
    }

    async fn invalidate(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .get_mut(key)
            .map(|mut entry| entry.valid = false)
            .is_some())
    }

    async fn purge(&self, now: Timestamp) -> Result<usize, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_servable_at(now));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }
}
