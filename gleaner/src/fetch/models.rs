//! Fetch request and result values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

use crate::cache::CacheEntry;
use crate::config::serde_duration;
use crate::config::CachePolicy;
use crate::errors::ErrorKind;

/// One URL to fetch. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Target URL.
    pub url: String,
    /// How the cache is consulted.
    #[serde(default)]
    pub cache_policy: CachePolicy,
    /// Whether redirects are followed.
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,
}

fn default_follow_redirects() -> bool {
    true
}

impl FetchRequest {
    /// Creates a request with the default cache policy that follows redirects.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cache_policy: CachePolicy::default(),
            follow_redirects: default_follow_redirects(),
        }
    }

    /// Sets the cache policy.
    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Sets redirect following.
    #[must_use]
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

/// Outcome of one fetch. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Requested URL.
    pub url: String,
    /// Whether a 2xx body was obtained.
    pub success: bool,
    /// HTTP status, when a response was received.
    pub status_code: Option<u16>,
    /// Response body, on success.
    pub body: Option<String>,
    /// Why the fetch failed.
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure detail.
    pub error_message: Option<String>,
    /// Whether the body was served from the cache.
    pub from_cache: bool,
    /// Wall time spent on this fetch.
    #[serde(with = "serde_duration::millis")]
    pub elapsed: Duration,
    /// Body length in bytes.
    pub byte_size: usize,
    /// Identifier of the session record for this fetch.
    pub session_id: Uuid,
    /// Address of the proxy used, if any.
    pub proxy_used: Option<String>,
    /// Cacheable subset of the response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl FetchResult {
    /// Builds a successful result from a network response.
    #[must_use]
    pub fn succeeded(
        url: impl Into<String>,
        status_code: u16,
        body: String,
        headers: BTreeMap<String, String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            success: true,
            status_code: Some(status_code),
            byte_size: body.len(),
            body: Some(body),
            error_kind: None,
            error_message: None,
            from_cache: false,
            elapsed,
            session_id: Uuid::new_v4(),
            proxy_used: None,
            headers,
        }
    }

    /// Builds a successful result from a cache entry.
    #[must_use]
    pub fn cached(entry: CacheEntry, elapsed: Duration) -> Self {
        Self {
            url: entry.url,
            success: true,
            status_code: Some(entry.status_code),
            byte_size: entry.content_length,
            body: Some(entry.body),
            error_kind: None,
            error_message: None,
            from_cache: true,
            elapsed,
            session_id: Uuid::new_v4(),
            proxy_used: None,
            headers: entry.headers,
        }
    }

    /// Builds a failed result.
    #[must_use]
    pub fn failed(
        url: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            success: false,
            status_code: match kind {
                ErrorKind::Http(status) => Some(status),
                _ => None,
            },
            body: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
            from_cache: false,
            elapsed,
            byte_size: 0,
            session_id: Uuid::new_v4(),
            proxy_used: None,
            headers: BTreeMap::new(),
        }
    }

    /// Builds the result for a URL that was never dispatched.
    #[must_use]
    pub fn cancelled(url: impl Into<String>, reason: Option<&str>) -> Self {
        let message = reason.map_or_else(
            || "Batch cancelled before dispatch".to_string(),
            |r| format!("Batch cancelled before dispatch: {r}"),
        );
        Self::failed(url, ErrorKind::Cancelled, message, Duration::ZERO)
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session_id(mut self, id: Uuid) -> Self {
        self.session_id = id;
        self
    }

    /// Sets the proxy address.
    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy_used = proxy;
        self
    }

    /// Sets the cacheable response headers.
    #[must_use]
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Whether the response is HTML according to its content type.
    #[must_use]
    pub fn is_html(&self) -> bool {
        self.headers
            .get("content-type")
            .is_some_and(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
    }

    /// Whether the failure may succeed on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.error_kind.is_some_and(|k| k.is_retryable())
    }

    /// Converts to dictionary, omitting the body.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut dict = HashMap::new();
        dict.insert("url".to_string(), serde_json::json!(self.url));
        dict.insert("success".to_string(), serde_json::json!(self.success));
        dict.insert("status_code".to_string(), serde_json::json!(self.status_code));
        dict.insert("from_cache".to_string(), serde_json::json!(self.from_cache));
        dict.insert("byte_size".to_string(), serde_json::json!(self.byte_size));
        dict.insert(
            "elapsed_ms".to_string(),
            serde_json::json!(self.elapsed.as_secs_f64() * 1000.0),
        );
        dict.insert("session_id".to_string(), serde_json::json!(self.session_id.to_string()));
        if let Some(kind) = self.error_kind {
            dict.insert("error".to_string(), serde_json::json!(kind.to_dict()));
        }
        if let Some(ref message) = self.error_message {
            dict.insert("error_message".to_string(), serde_json::json!(message));
        }
        if let Some(ref proxy) = self.proxy_used {
            dict.insert("proxy_used".to_string(), serde_json::json!(proxy));
        }
        dict
    }
}
