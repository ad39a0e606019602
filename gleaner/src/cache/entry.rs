//! Cache entries and key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::utils::Timestamp;

/// Response headers worth keeping alongside a cached body.
pub const CACHED_HEADERS: &[&str] = &[
    "cache-control",
    "content-encoding",
    "content-type",
    "etag",
    "last-modified",
];

/// Derives the cache key for a URL.
///
/// The key is the SHA-256 hex digest of the exact URL string. No
/// normalization is applied, so URLs differing in case or query order are
/// distinct entries.
#[must_use]
pub fn cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Keeps only the headers in [`CACHED_HEADERS`], with lower-cased names.
#[must_use]
pub fn header_subset<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .filter(|(name, _)| CACHED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| (name, value.to_string()))
        .collect()
}

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hash of the URL.
    pub key: String,
    /// The URL as fetched.
    pub url: String,
    /// Response body.
    pub body: String,
    /// HTTP status of the cached response.
    pub status_code: u16,
    /// Subset of response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Body length in bytes.
    pub content_length: usize,
    /// When the entry was written.
    pub cached_at: Timestamp,
    /// When the entry stops being served.
    pub expires_at: Timestamp,
    /// Number of times the entry has been served.
    #[serde(default)]
    pub hit_count: u64,
    /// Whether the entry may be served at all.
    #[serde(default = "default_valid")]
    pub valid: bool,
}

fn default_valid() -> bool {
    true
}

impl CacheEntry {
    /// Whether the entry has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    /// Whether the entry may be served at `now`.
    #[must_use]
    pub fn is_servable_at(&self, now: Timestamp) -> bool {
        self.valid && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    #[test]
    fn test_cache_key_is_stable_sha256() {
        assert_eq!(
            cache_key("https://example.com/"),
            "0f115db062b7c0dd030b16878c99dea5c354b49dc37b38eb8846179c7783e9d7"
        );
        assert_eq!(cache_key("a"), cache_key("a"));
        assert_eq!(cache_key("x").len(), 64);
    }

    #[test]
    fn test_cache_key_does_not_normalize() {
        assert_ne!(cache_key("https://Example.com/a"), cache_key("https://example.com/a"));
        assert_ne!(
            cache_key("https://example.com/?a=1&b=2"),
            cache_key("https://example.com/?b=2&a=1")
        );
    }

    #[test]
    fn test_header_subset() {
        let headers = header_subset([
            ("Content-Type", "text/html"),
            ("Set-Cookie", "secret=1"),
            ("ETag", "\"abc\""),
        ]);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("content-type"), Some(&"text/html".to_string()));
        assert_eq!(headers.get("etag"), Some(&"\"abc\"".to_string()));
        assert!(!headers.contains_key("set-cookie"));
    }

    #[test]
    fn test_entry_servable() {
        let now = Utc::now();
        let mut entry = CacheEntry {
            key: cache_key("u"),
            url: "u".to_string(),
            body: String::new(),
            status_code: 200,
            headers: BTreeMap::new(),
            content_length: 0,
            cached_at: now,
            expires_at: now,
            hit_count: 0,
            valid: true,
        };
        assert!(entry.is_servable_at(now));
        assert!(!entry.is_servable_at(now + ChronoDuration::milliseconds(1)));

        entry.expires_at = now + ChronoDuration::hours(1);
        entry.valid = false;
        assert!(!entry.is_servable_at(now));
    }
}
