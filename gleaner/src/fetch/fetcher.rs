//! Single-URL fetch composing the rate limiter, cache and proxy pool.

use dashmap::DashMap;
use reqwest::header::{HeaderMap, RETRY_AFTER, USER_AGENT};
use reqwest::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::client::{ClientFactory, UserAgentPolicy};
use super::session::{FetchSession, NoOpSessionSink, SessionSink};
use super::{FetchRequest, FetchResult};
use crate::cache::{header_subset, ContentCache};
use crate::config::EngineSettings;
use crate::errors::{EngineError, ErrorKind};
use crate::observability::SpanTimer;
use crate::proxy::{ProxyPool, ProxyRecord};
use crate::ratelimit::RateLimiter;
use crate::utils::{add_duration, domain_of, extract_domain, parse_retry_after, system_clock, Clock};

/// Statuses after which a proxy is excluded for the domain at once.
const PROXY_BLOCK_STATUSES: &[u16] = &[403, 407, 429];

/// Per-call deadline and cache lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Deadline for the network attempt, including the body read.
    pub timeout: Duration,
    /// Lifetime of a cache entry written by this fetch.
    pub cache_ttl: Duration,
}

/// Performs one HTTP GET per call.
///
/// Each call consults the cache, asks the rate limiter, picks a proxy and
/// issues at most one network attempt. There is no internal retry. Every
/// side effect (rate-limit record, cache write, proxy report, session
/// record) happens exactly once per call.
pub struct Fetcher {
    limiter: Arc<RateLimiter>,
    cache: Arc<ContentCache>,
    proxies: Arc<ProxyPool>,
    clients: ClientFactory,
    sink: Arc<dyn SessionSink>,
    user_agents: UserAgentPolicy,
    clock: Arc<dyn Clock>,
    limits: FetchLimits,
    max_response_bytes: usize,
    proxy_failure_threshold: u32,
    rate_limit_cooldown: Duration,
    proxy_failures: DashMap<(Uuid, String), u32>,
}

/// Response data gathered within the deadline.
struct Received {
    status: u16,
    headers: BTreeMap<String, String>,
    retry_after: Option<String>,
    body: Vec<u8>,
}

enum SendError {
    Request(reqwest::Error),
    TooLarge(usize),
}

/// What happened on the wire, before translation into a result.
enum Outcome {
    Received(Received),
    Failed(ErrorKind, String),
}

impl Fetcher {
    /// Creates a fetcher from settings and shared components.
    #[must_use]
    pub fn new(
        settings: &EngineSettings,
        limiter: Arc<RateLimiter>,
        cache: Arc<ContentCache>,
        proxies: Arc<ProxyPool>,
    ) -> Self {
        Self {
            limiter,
            cache,
            proxies,
            clients: ClientFactory::new(settings),
            sink: Arc::new(NoOpSessionSink),
            user_agents: UserAgentPolicy::from_settings(settings),
            clock: system_clock(),
            limits: FetchLimits {
                timeout: settings.request_timeout,
                cache_ttl: settings.cache_ttl,
            },
            max_response_bytes: settings.max_response_bytes,
            proxy_failure_threshold: settings.proxy_failure_threshold,
            rate_limit_cooldown: settings.rate_limit_cooldown,
            proxy_failures: DashMap::new(),
        }
    }

    /// Sets the sink receiving one session per fetch.
    #[must_use]
    pub fn with_session_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replaces the client factory.
    #[must_use]
    pub fn with_client_factory(mut self, clients: ClientFactory) -> Self {
        self.clients = clients;
        self
    }

    /// Sets the clock used for session timestamps and block expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the default limits.
    #[must_use]
    pub fn limits(&self) -> FetchLimits {
        self.limits
    }

    /// Returns the rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Returns the content cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Returns the proxy pool.
    #[must_use]
    pub fn proxies(&self) -> &Arc<ProxyPool> {
        &self.proxies
    }

    /// Fetches one URL with the default limits.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        self.fetch_with(request, self.limits).await
    }

    /// Fetches one URL with explicit limits.
    pub async fn fetch_with(&self, request: &FetchRequest, limits: FetchLimits) -> FetchResult {
        let timer = SpanTimer::start("fetch");
        let started_at = self.clock.now();

        let (result, domain, user_agent) = match Url::parse(&request.url) {
            Ok(url) => match domain_of(&url).filter(|_| matches!(url.scheme(), "http" | "https")) {
                Some(domain) => {
                    let (result, user_agent) = self.fetch_url(request, url, &domain, limits, &timer).await;
                    (result, Some(domain), user_agent)
                }
                None => (invalid_url(request, "URL has no host or an unsupported scheme", &timer), None, None),
            },
            Err(e) => (invalid_url(request, &e.to_string(), &timer), None, None),
        };

        let elapsed = timer.finish();
        debug!(
            url = %request.url,
            success = result.success,
            status = ?result.status_code,
            from_cache = result.from_cache,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Fetch finished"
        );

        let session = FetchSession::from_result(&result, domain, started_at, self.clock.now(), user_agent);
        self.sink.record(session).await;
        result
    }

    /// Produces the result for a URL that will not be dispatched.
    ///
    /// No rate-limit, cache or proxy state is touched; only the session is
    /// recorded.
    pub async fn skip(&self, url: &str, reason: Option<&str>) -> FetchResult {
        let now = self.clock.now();
        let result = FetchResult::cancelled(url, reason);
        let domain = extract_domain(url);
        self.sink
            .record(FetchSession::from_result(&result, domain, now, now, None))
            .await;
        result
    }

    async fn fetch_url(
        &self,
        request: &FetchRequest,
        url: Url,
        domain: &str,
        limits: FetchLimits,
        timer: &SpanTimer,
    ) -> (FetchResult, Option<String>) {
        if request.cache_policy.reads() {
            if let Some(entry) = self.cache.get(&request.url).await {
                return (FetchResult::cached(entry, timer.elapsed()), None);
            }
        }

        let Some(reservation) = self.limiter.reserve(domain).await else {
            let result = FetchResult::failed(
                &request.url,
                ErrorKind::RateLimited,
                format!("Rate limit reached for {domain}"),
                timer.elapsed(),
            );
            return (result, None);
        };

        let proxy = self.proxies.select(domain);
        let client = match self.client_for(proxy.as_ref(), request.follow_redirects) {
            Ok(client) => client,
            Err(e) => {
                reservation.release().await;
                warn!(url = %request.url, error = %e, "Could not build HTTP client");
                let result = FetchResult::failed(&request.url, ErrorKind::Transport, e.to_string(), timer.elapsed())
                    .with_proxy(proxy.as_ref().map(ProxyRecord::address));
                return (result, None);
            }
        };

        let user_agent = self.user_agents.next();
        let attempt = Instant::now();
        let sent = tokio::time::timeout(limits.timeout, self.send(&client, url, &user_agent)).await;
        let latency = attempt.elapsed();
        reservation.record().await;

        let outcome = match sent {
            Ok(Ok(received)) => Outcome::Received(received),
            Ok(Err(SendError::TooLarge(size))) => Outcome::Failed(
                ErrorKind::Transport,
                format!("Response body exceeds {} bytes ({size} read)", self.max_response_bytes),
            ),
            Ok(Err(SendError::Request(e))) if e.is_timeout() => Outcome::Failed(ErrorKind::Timeout, e.to_string()),
            Ok(Err(SendError::Request(e))) => Outcome::Failed(ErrorKind::Transport, e.to_string()),
            Err(_) => Outcome::Failed(
                ErrorKind::Timeout,
                format!("No response within {} ms", limits.timeout.as_millis()),
            ),
        };

        let result = self
            .settle(request, domain, proxy.as_ref(), outcome, latency, limits, timer)
            .await
            .with_proxy(proxy.as_ref().map(ProxyRecord::address));
        (result, Some(user_agent))
    }

    /// Returns the client for an egress path, dropping clients of departed proxies.
    fn client_for(&self, proxy: Option<&ProxyRecord>, follow_redirects: bool) -> Result<Client, EngineError> {
        if proxy.is_some() && self.clients.len() > 2 * (self.proxies.len() + 1) {
            let dropped = self.clients.prune(&self.proxies.snapshot());
            debug!(dropped, "Pruned clients of departed proxies");
        }
        self.clients.client_for(proxy, follow_redirects)
    }

    async fn send(&self, client: &Client, url: Url, user_agent: &str) -> Result<Received, SendError> {
        let mut response = client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(SendError::Request)?;

        let status = response.status().as_u16();
        let headers = cacheable_headers(response.headers());
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(len) = response.content_length() {
            let len = usize::try_from(len).unwrap_or(usize::MAX);
            if len > self.max_response_bytes {
                return Err(SendError::TooLarge(len));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(SendError::Request)? {
            body.extend_from_slice(&chunk);
            if body.len() > self.max_response_bytes {
                return Err(SendError::TooLarge(body.len()));
            }
        }

        Ok(Received {
            status,
            headers,
            retry_after,
            body,
        })
    }

    /// Applies the outcome to the cache, proxy pool and rate limiter.
    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        request: &FetchRequest,
        domain: &str,
        proxy: Option<&ProxyRecord>,
        outcome: Outcome,
        latency: Duration,
        limits: FetchLimits,
        timer: &SpanTimer,
    ) -> FetchResult {
        match outcome {
            Outcome::Received(received) if (200..300).contains(&received.status) => {
                let body = String::from_utf8_lossy(&received.body).into_owned();
                if request.cache_policy.writes() {
                    self.cache
                        .put(&request.url, body.clone(), received.status, received.headers.clone(), Some(limits.cache_ttl))
                        .await;
                }
                if let Some(proxy) = proxy {
                    self.proxies.report(proxy.id, domain, true, latency);
                    self.proxy_failures.remove(&(proxy.id, domain.to_string()));
                }
                FetchResult::succeeded(&request.url, received.status, body, received.headers, timer.elapsed())
            }
            Outcome::Received(received) => {
                let status = received.status;
                if status == 429 {
                    self.cool_down(domain, received.retry_after.as_deref()).await;
                }
                if let Some(proxy) = proxy {
                    self.proxies.report(proxy.id, domain, false, latency);
                    self.proxy_failures.remove(&(proxy.id, domain.to_string()));
                    if PROXY_BLOCK_STATUSES.contains(&status) {
                        self.proxies.block_for_domain(proxy.id, domain);
                    }
                }
                FetchResult::failed(&request.url, ErrorKind::Http(status), format!("HTTP {status}"), timer.elapsed())
                    .with_headers(received.headers)
            }
            Outcome::Failed(kind, message) => {
                if let Some(proxy) = proxy {
                    self.proxies.report(proxy.id, domain, false, latency);
                    if matches!(kind, ErrorKind::Timeout | ErrorKind::Transport) {
                        self.count_proxy_failure(proxy, domain);
                    }
                }
                debug!(url = %request.url, domain, kind = kind.as_str(), error = %message, "Fetch failed");
                FetchResult::failed(&request.url, kind, message, timer.elapsed())
            }
        }
    }

    /// Blocks the domain after a 429 until `Retry-After` or the cooldown.
    async fn cool_down(&self, domain: &str, retry_after: Option<&str>) {
        let now = self.clock.now();
        let until = retry_after
            .and_then(|v| parse_retry_after(v, now))
            .unwrap_or_else(|| add_duration(now, self.rate_limit_cooldown));

        match self.limiter.block(domain, Some(until), "HTTP 429").await {
            Ok(()) => info!(domain, %until, "Domain cooling down after 429"),
            Err(e) => warn!(domain, error = %e, "Failed to block domain after 429"),
        }
    }

    fn count_proxy_failure(&self, proxy: &ProxyRecord, domain: &str) {
        let key = (proxy.id, domain.to_string());
        let failures = {
            let mut count = self.proxy_failures.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if failures >= self.proxy_failure_threshold {
            self.proxies.block_for_domain(proxy.id, domain);
            self.proxy_failures.remove(&key);
            warn!(proxy = %proxy.address(), domain, failures, "Proxy blocked after consecutive failures");
        }
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("limits", &self.limits)
            .field("user_agents", &self.user_agents)
            .field("max_response_bytes", &self.max_response_bytes)
            .field("proxy_failure_threshold", &self.proxy_failure_threshold)
            .finish_non_exhaustive()
    }
}

fn invalid_url(request: &FetchRequest, reason: &str, timer: &SpanTimer) -> FetchResult {
    FetchResult::failed(
        &request.url,
        ErrorKind::InvalidUrl,
        format!("Invalid URL '{}': {reason}", request.url),
        timer.elapsed(),
    )
}

fn cacheable_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    header_subset(
        headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CachePolicy;
    use crate::fetch::session::CollectingSessionSink;
    use crate::config::RateLimitConfig;
    use crate::fetch::SessionStatus;
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CLOSED_PORT: u16 = 9;

    fn proxied_fetcher(threshold: u32, proxy: ProxyRecord) -> (Fetcher, Arc<ProxyPool>) {
        let settings = EngineSettings::default()
            .with_proxy_enabled(true)
            .with_proxy_failure_threshold(threshold)
            .with_rate_limit(RateLimitConfig::new(1000, 10_000));
        let pool = Arc::new(ProxyPool::new(true).with_proxies([proxy]));
        let fetcher = Fetcher::new(
            &settings,
            Arc::new(RateLimiter::in_memory(settings.rate_limit)),
            Arc::new(ContentCache::in_memory(settings.cache_ttl)),
            pool.clone(),
        );
        (fetcher, pool)
    }

    /// Serves every connection a fixed `200 ok`, acting as a forward proxy.
    async fn answering_proxy() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                        .await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        port
    }

    async fn fetch_via(fetcher: &Fetcher, url: &str) -> FetchResult {
        fetcher
            .fetch(&FetchRequest::new(url).with_cache_policy(CachePolicy::Bypass))
            .await
    }

    fn moved(pool: &ProxyPool, id: Uuid, port: u16) {
        let mut proxy = pool.get(id).unwrap();
        proxy.port = port;
        pool.add(proxy);
    }

    fn fetcher(settings: &EngineSettings) -> (Fetcher, Arc<CollectingSessionSink>) {
        let sink = Arc::new(CollectingSessionSink::new());
        let fetcher = Fetcher::new(
            settings,
            Arc::new(RateLimiter::in_memory(settings.rate_limit)),
            Arc::new(ContentCache::in_memory(settings.cache_ttl)),
            Arc::new(ProxyPool::disabled()),
        )
        .with_session_sink(sink.clone());
        (fetcher, sink)
    }

    #[tokio::test]
    async fn test_invalid_url_has_no_side_effects() {
        let (fetcher, sink) = fetcher(&EngineSettings::default());

        for url in ["not a url", "mailto:someone@a.test", "file:///etc/hosts"] {
            let result = fetcher.fetch(&FetchRequest::new(url)).await;
            assert_eq!(result.error_kind, Some(ErrorKind::InvalidUrl), "{url}");
        }

        assert_eq!(sink.len(), 3);
        assert!(sink.sessions().iter().all(|s| s.domain.is_none()));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_rate_limiter() {
        let settings = EngineSettings::default();
        let (fetcher, sink) = fetcher(&settings);
        fetcher
            .cache()
            .put("http://a.test/", "<p>cached</p>", 200, BTreeMap::new(), None)
            .await;

        let result = fetcher.fetch(&FetchRequest::new("http://a.test/")).await;
        assert!(result.success);
        assert!(result.from_cache);
        assert_eq!(result.body.as_deref(), Some("<p>cached</p>"));
        assert!(fetcher.limiter().state("a.test").await.unwrap().is_none());
        assert_eq!(sink.with_status(SessionStatus::Cached).len(), 1);
        assert_eq!(sink.sessions()[0].id, result.session_id);
    }

    #[tokio::test]
    async fn test_rate_limited_issues_no_request() {
        let (fetcher, _sink) = fetcher(&EngineSettings::default());
        fetcher.limiter().block("a.test", None, "manual").await.unwrap();

        let request = FetchRequest::new("http://a.test/").with_cache_policy(CachePolicy::Bypass);
        let result = fetcher.fetch(&request).await;
        assert_eq!(result.error_kind, Some(ErrorKind::RateLimited));

        let state = fetcher.limiter().state("a.test").await.unwrap().unwrap();
        assert_eq!(state.minute_count, 0);
        assert_eq!(state.in_flight, 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_and_counted() {
        let (fetcher, sink) = fetcher(&EngineSettings::default());

        // Port 9 (discard) on loopback is closed in test environments.
        let result = fetcher
            .fetch(&FetchRequest::new("http://127.0.0.1:9/").with_cache_policy(CachePolicy::Bypass))
            .await;
        assert!(!result.success);
        assert!(matches!(result.error_kind, Some(ErrorKind::Transport | ErrorKind::Timeout)));

        let state = fetcher.limiter().state("127.0.0.1").await.unwrap().unwrap();
        assert_eq!(state.minute_count, 1);
        assert_eq!(state.in_flight, 0);
        assert_eq!(sink.len(), 1);
        assert!(sink.sessions()[0].user_agent.is_some());
    }

    #[tokio::test]
    async fn test_proxy_blocked_for_domain_at_failure_threshold() {
        let proxy = ProxyRecord::new("127.0.0.1", CLOSED_PORT);
        let id = proxy.id;
        let (fetcher, pool) = proxied_fetcher(2, proxy);

        let result = fetch_via(&fetcher, "http://a.test/").await;
        assert!(matches!(result.error_kind, Some(ErrorKind::Transport | ErrorKind::Timeout)));
        assert!(pool.get(id).unwrap().is_eligible_for("a.test"));

        fetch_via(&fetcher, "http://a.test/").await;
        let proxy = pool.get(id).unwrap();
        assert!(!proxy.is_eligible_for("a.test"));
        assert!(proxy.is_eligible_for("b.test"));
        assert_eq!(proxy.failure_count, 2);
    }

    #[tokio::test]
    async fn test_success_resets_proxy_failure_count() {
        let proxy = ProxyRecord::new("127.0.0.1", CLOSED_PORT);
        let id = proxy.id;
        let (fetcher, pool) = proxied_fetcher(2, proxy);

        fetch_via(&fetcher, "http://a.test/").await;
        assert!(pool.get(id).unwrap().is_eligible_for("a.test"));

        // Same proxy id at a new address must not reuse the old client.
        moved(&pool, id, answering_proxy().await);
        let result = fetch_via(&fetcher, "http://a.test/").await;
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.body.as_deref(), Some("ok"));

        moved(&pool, id, CLOSED_PORT);
        fetch_via(&fetcher, "http://a.test/").await;
        assert!(pool.get(id).unwrap().is_eligible_for("a.test"));

        fetch_via(&fetcher, "http://a.test/").await;
        assert!(!pool.get(id).unwrap().is_eligible_for("a.test"));
    }

    #[tokio::test]
    async fn test_clients_of_removed_proxies_are_pruned() {
        let proxy = ProxyRecord::new("127.0.0.1", CLOSED_PORT);
        let id = proxy.id;
        let (fetcher, pool) = proxied_fetcher(100, proxy);

        for port in 10..16 {
            moved(&pool, id, port);
            fetch_via(&fetcher, "http://a.test/").await;
        }
        assert!(fetcher.clients.len() <= 2 * (pool.len() + 1) + 1);

        pool.remove(id);
        fetcher.clients.prune(&pool.snapshot());
        assert!(fetcher.clients.is_empty());
    }
}
