//! Time-boxed content cache.
//!
//! Entries are keyed by the SHA-256 of the exact URL string, expire at a
//! time fixed when written, and count every serve.

mod content;
mod entry;
mod store;

pub use content::ContentCache;
pub use entry::{cache_key, header_subset, CacheEntry, CACHED_HEADERS};
pub use store::{CacheStore, InMemoryCacheStore};

#[cfg(test)]
pub use store::MockCacheStore;
