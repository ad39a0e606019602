//! Per-fetch session records and the sinks that receive them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

use super::FetchResult;
use crate::config::serde_duration;
use crate::errors::ErrorKind;
use crate::utils::{iso_format, Timestamp};

/// Final state of one fetch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// A 2xx body was fetched from the network.
    Completed,
    /// Served from the cache.
    Cached,
    /// The fetch failed.
    Failed,
    /// The deadline was exceeded.
    Timeout,
    /// Refused by the rate limiter or by the remote site.
    Blocked,
    /// Never dispatched.
    Cancelled,
}

impl SessionStatus {
    /// Derives the status from a fetch result.
    #[must_use]
    pub fn of(result: &FetchResult) -> Self {
        if result.success {
            return if result.from_cache {
                Self::Cached
            } else {
                Self::Completed
            };
        }
        match result.error_kind {
            Some(ErrorKind::Timeout) => Self::Timeout,
            Some(ErrorKind::RateLimited | ErrorKind::Http(403 | 429)) => Self::Blocked,
            Some(ErrorKind::Cancelled) => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    /// Short stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Cached => "cached",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Observability record for one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSession {
    /// Session identifier, shared with the [`FetchResult`].
    pub id: Uuid,
    /// Requested URL.
    pub url: String,
    /// Domain the request counted against, if the URL parsed.
    pub domain: Option<String>,
    /// When the fetch started.
    pub started_at: Timestamp,
    /// When the fetch ended.
    pub ended_at: Timestamp,
    /// Wall time of the fetch.
    #[serde(with = "serde_duration::millis")]
    pub duration: Duration,
    /// Outcome.
    pub status: SessionStatus,
    /// HTTP status, if a response was received.
    pub status_code: Option<u16>,
    /// Response size in bytes, on success.
    pub response_size: Option<usize>,
    /// Address of the proxy used.
    pub proxy_used: Option<String>,
    /// User agent sent, if a request was issued.
    pub user_agent: Option<String>,
    /// Failure detail.
    pub error_message: Option<String>,
}

impl FetchSession {
    /// Builds the session record for a finished fetch.
    #[must_use]
    pub fn from_result(
        result: &FetchResult,
        domain: Option<String>,
        started_at: Timestamp,
        ended_at: Timestamp,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: result.session_id,
            url: result.url.clone(),
            domain,
            started_at,
            ended_at,
            duration: result.elapsed,
            status: SessionStatus::of(result),
            status_code: result.status_code,
            response_size: result.success.then_some(result.byte_size),
            proxy_used: result.proxy_used.clone(),
            user_agent,
            error_message: result.error_message.clone(),
        }
    }

    /// Converts to dictionary.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut dict = HashMap::new();
        dict.insert("id".to_string(), serde_json::json!(self.id.to_string()));
        dict.insert("url".to_string(), serde_json::json!(self.url));
        dict.insert("domain".to_string(), serde_json::json!(self.domain));
        dict.insert("started_at".to_string(), serde_json::json!(iso_format(&self.started_at)));
        dict.insert("ended_at".to_string(), serde_json::json!(iso_format(&self.ended_at)));
        dict.insert(
            "duration_ms".to_string(),
            serde_json::json!(self.duration.as_secs_f64() * 1000.0),
        );
        dict.insert("status".to_string(), serde_json::json!(self.status.as_str()));
        dict.insert("status_code".to_string(), serde_json::json!(self.status_code));
        dict.insert("response_size".to_string(), serde_json::json!(self.response_size));
        dict.insert("proxy_used".to_string(), serde_json::json!(self.proxy_used));
        dict.insert("user_agent".to_string(), serde_json::json!(self.user_agent));
        dict.insert("error_message".to_string(), serde_json::json!(self.error_message));
        dict
    }
}

/// Receives one [`FetchSession`] per fetch.
///
/// Implementations must not fail the fetch; errors are theirs to log.
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Records a finished session.
    async fn record(&self, session: FetchSession);
}

/// A sink that discards all sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSessionSink;

#[async_trait]
impl SessionSink for NoOpSessionSink {
    async fn record(&self, _session: FetchSession) {}
}

/// A sink that logs sessions using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingSessionSink {
    level: Level,
}

impl Default for LoggingSessionSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingSessionSink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl SessionSink for LoggingSessionSink {
    async fn record(&self, session: FetchSession) {
        let duration_ms = session.duration.as_secs_f64() * 1000.0;
        let status = session.status.as_str();
        let domain = session.domain.as_deref().unwrap_or("-");

        let failed = matches!(
            session.status,
            SessionStatus::Failed | SessionStatus::Timeout | SessionStatus::Blocked
        );
        if failed {
            warn!(
                session_id = %session.id,
                url = %session.url,
                domain,
                status,
                status_code = ?session.status_code,
                error = ?session.error_message,
                duration_ms,
                "Fetch session"
            );
        } else if self.level == Level::DEBUG {
            debug!(
                session_id = %session.id,
                url = %session.url,
                domain,
                status,
                status_code = ?session.status_code,
                proxy = ?session.proxy_used,
                duration_ms,
                "Fetch session"
            );
        } else {
            info!(
                session_id = %session.id,
                url = %session.url,
                domain,
                status,
                status_code = ?session.status_code,
                proxy = ?session.proxy_used,
                duration_ms,
                "Fetch session"
            );
        }
    }
}

/// A collecting sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingSessionSink {
    sessions: parking_lot::RwLock<Vec<FetchSession>>,
}

impl CollectingSessionSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<FetchSession> {
        self.sessions.read().clone()
    }

    /// Returns the number of collected sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Returns sessions with the given status.
    #[must_use]
    pub fn with_status(&self, status: SessionStatus) -> Vec<FetchSession> {
        self.sessions
            .read()
            .iter()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }

    /// Clears all collected sessions.
    pub fn clear(&self) {
        self.sessions.write().clear();
    }
}

#[async_trait]
impl SessionSink for CollectingSessionSink {
    async fn record(&self, session: FetchSession) {
        self.sessions.write().push(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn session_for(result: &FetchResult) -> FetchSession {
        let now = Utc::now();
        FetchSession::from_result(result, Some("a.test".into()), now, now, None)
    }

    #[test]
    fn test_status_mapping() {
        let ok = FetchResult::succeeded("u", 200, "b".into(), BTreeMap::new(), Duration::ZERO);
        assert_eq!(SessionStatus::of(&ok), SessionStatus::Completed);

        let mut cached = ok.clone();
        cached.from_cache = true;
        assert_eq!(SessionStatus::of(&cached), SessionStatus::Cached);

        let cases = [
            (ErrorKind::Timeout, SessionStatus::Timeout),
            (ErrorKind::RateLimited, SessionStatus::Blocked),
            (ErrorKind::Http(429), SessionStatus::Blocked),
            (ErrorKind::Http(403), SessionStatus::Blocked),
            (ErrorKind::Http(404), SessionStatus::Failed),
            (ErrorKind::Transport, SessionStatus::Failed),
            (ErrorKind::Cancelled, SessionStatus::Cancelled),
        ];
        for (kind, expected) in cases {
            let result = FetchResult::failed("u", kind, "x", Duration::ZERO);
            assert_eq!(SessionStatus::of(&result), expected, "{kind:?}");
        }
    }

    #[test]
    fn test_session_shares_result_id() {
        let result = FetchResult::failed("u", ErrorKind::Transport, "refused", Duration::from_millis(3));
        let session = session_for(&result);
        assert_eq!(session.id, result.session_id);
        assert_eq!(session.response_size, None);
        assert_eq!(session.error_message.as_deref(), Some("refused"));
        assert_eq!(session.to_dict()["status"], serde_json::json!("failed"));
    }

    #[tokio::test]
    async fn test_sinks() {
        let result = FetchResult::succeeded("u", 200, "body".into(), BTreeMap::new(), Duration::ZERO);

        NoOpSessionSink.record(session_for(&result)).await;
        LoggingSessionSink::default().record(session_for(&result)).await;
        LoggingSessionSink::debug().record(session_for(&result)).await;

        let sink = CollectingSessionSink::new();
        assert!(sink.is_empty());
        sink.record(session_for(&result)).await;
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.with_status(SessionStatus::Completed).len(), 1);
        assert_eq!(sink.sessions()[0].response_size, Some(4));
        sink.clear();
        assert!(sink.is_empty());
    }
}
