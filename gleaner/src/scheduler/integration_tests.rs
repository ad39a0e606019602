//! End-to-end batch tests against a local HTTP server.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancellation::CancellationToken;
use crate::config::{EngineSettings, FetchOptions, RateLimitConfig};
use crate::engine::Engine;
use crate::errors::ErrorKind;
use crate::fetch::{CollectingSessionSink, FetchRequest, FetchResult, SessionStatus};
use crate::proxy::ProxyRecord;

const PAGE: &str = "<html><head><title>Funding</title></head><body><main>Fully funded scholarship in computer science</main></body></html>";

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct TestServer {
    addr: SocketAddr,
    counters: Arc<Counters>,
}

impl TestServer {
    async fn start() -> Self {
        let counters = Arc::new(Counters::default());
        let app = Router::new()
            .route("/ok", get(ok))
            .route("/missing", get(missing))
            .route("/slow", get(slow))
            .route("/page/:n", get(page))
            .route("/throttle", get(throttle))
            .route("/forbidden", get(forbidden))
            .with_state(Arc::clone(&counters));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, counters }
    }

    fn url(&self, host: &str, path: &str) -> String {
        format!("http://{host}:{}{path}", self.addr.port())
    }

    fn hits(&self) -> usize {
        self.counters.hits.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }

    fn engine(&self, settings: EngineSettings) -> (Engine, Arc<CollectingSessionSink>) {
        self.engine_with_proxies(settings, Vec::new())
    }

    fn engine_with_proxies(
        &self,
        settings: EngineSettings,
        proxies: Vec<ProxyRecord>,
    ) -> (Engine, Arc<CollectingSessionSink>) {
        let sink = Arc::new(CollectingSessionSink::new());
        let engine = Engine::builder(settings)
            .with_resolve("a.test", self.addr)
            .with_resolve("b.test", self.addr)
            .with_proxies(proxies)
            .with_session_sink(sink.clone())
            .build()
            .unwrap();
        (engine, sink)
    }
}

async fn ok(State(counters): State<Arc<Counters>>) -> Html<&'static str> {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    Html(PAGE)
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn slow() -> Html<&'static str> {
    tokio::time::sleep(Duration::from_millis(500)).await;
    Html(PAGE)
}

async fn page(State(counters): State<Arc<Counters>>, Path(n): Path<u32>) -> Html<String> {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    let current = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    counters.max_in_flight.fetch_max(current, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(20)).await;
    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    Html(format!("<main>page {n}</main>"))
}

async fn throttle() -> impl IntoResponse {
    (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "120")], "slow down")
}

async fn forbidden() -> StatusCode {
    StatusCode::FORBIDDEN
}

fn generous_settings() -> EngineSettings {
    EngineSettings::new().with_rate_limit(RateLimitConfig::new(10_000, 100_000))
}

fn by_url(results: &[FetchResult], url: &str) -> FetchResult {
    results
        .iter()
        .find(|r| r.url == url)
        .cloned()
        .unwrap_or_else(|| panic!("no result for {url}"))
}

#[tokio::test]
async fn test_ok_missing_and_slow_with_short_timeout() {
    let server = TestServer::start().await;
    let (engine, sink) = server.engine(generous_settings());
    let ok = server.url("a.test", "/ok");
    let missing = server.url("a.test", "/missing");
    let slow = server.url("a.test", "/slow");

    let options = FetchOptions::new().with_request_timeout(Duration::from_millis(50));
    let results = engine
        .fetch_all([&ok, &missing, &slow], &options, CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;
    assert_eq!(results.len(), 3);

    let ok_result = by_url(&results, &ok);
    assert!(ok_result.success);
    assert_eq!(ok_result.status_code, Some(200));
    assert_eq!(ok_result.body.as_deref(), Some(PAGE));
    assert!(ok_result.is_html());

    let missing_result = by_url(&results, &missing);
    assert!(!missing_result.success);
    assert_eq!(missing_result.error_kind, Some(ErrorKind::Http(404)));
    assert_eq!(missing_result.status_code, Some(404));

    let slow_result = by_url(&results, &slow);
    assert_eq!(slow_result.error_kind, Some(ErrorKind::Timeout));
    assert!(slow_result.elapsed < Duration::from_millis(450));

    let state = engine.limiter().state("a.test").await.unwrap().unwrap();
    assert_eq!(state.minute_count, 3);
    assert_eq!(state.in_flight, 0);
    assert_eq!(sink.len(), 3);
    assert_eq!(sink.with_status(SessionStatus::Timeout).len(), 1);
}

#[tokio::test]
async fn test_batch_completeness_and_concurrency_bound() {
    for concurrency in [1, 5, 50] {
        let server = TestServer::start().await;
        let (engine, _sink) = server.engine(generous_settings());
        let urls: Vec<String> = (0..60).map(|i| server.url("a.test", &format!("/page/{i}"))).collect();

        let options = FetchOptions::new().with_max_concurrency(concurrency);
        let results = engine
            .fetch_all(urls.clone(), &options, CancellationToken::new())
            .unwrap()
            .collect_all()
            .await;

        assert_eq!(results.len(), 60, "concurrency {concurrency}");
        let seen: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(seen.len(), 60, "concurrency {concurrency}");
        assert!(results.iter().all(|r| r.success), "concurrency {concurrency}");
        assert_eq!(server.hits(), 60);
        assert!(
            server.max_in_flight() <= concurrency,
            "observed {} in flight with limit {concurrency}",
            server.max_in_flight()
        );
    }
}

#[tokio::test]
async fn test_mixed_batch_complete_at_every_concurrency() {
    for concurrency in [1, 5, 50] {
        let server = TestServer::start().await;
        let (engine, _sink) = server.engine(generous_settings());
        let urls: Vec<String> = (0..12)
            .map(|i| {
                let path = ["/ok", "/missing", "/slow"][i % 3];
                server.url("a.test", &format!("{path}?i={i}"))
            })
            .collect();

        let options = FetchOptions::new()
            .with_max_concurrency(concurrency)
            .with_request_timeout(Duration::from_millis(50));
        let results = engine
            .fetch_all(urls.clone(), &options, CancellationToken::new())
            .unwrap()
            .collect_all()
            .await;

        assert_eq!(results.len(), 12, "concurrency {concurrency}");
        let seen: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(seen, urls.iter().map(String::as_str).collect::<HashSet<_>>(), "concurrency {concurrency}");

        let count = |kind: ErrorKind| results.iter().filter(|r| r.error_kind == Some(kind)).count();
        assert_eq!(results.iter().filter(|r| r.success).count(), 4, "concurrency {concurrency}");
        assert_eq!(count(ErrorKind::Http(404)), 4, "concurrency {concurrency}");
        assert_eq!(count(ErrorKind::Timeout), 4, "concurrency {concurrency}");

        let state = engine.limiter().state("a.test").await.unwrap().unwrap();
        assert_eq!(state.in_flight, 0);
    }
}

#[tokio::test]
async fn test_slow_and_blocked_domains_do_not_delay_others() {
    let server = TestServer::start().await;
    let (engine, _sink) = server.engine(generous_settings());
    engine.limiter().block("c.test", None, "manual").await.unwrap();

    let slow: Vec<String> = (0..4).map(|i| server.url("a.test", &format!("/slow?i={i}"))).collect();
    let fast: Vec<String> = (0..4).map(|i| server.url("b.test", &format!("/ok?i={i}"))).collect();
    let blocked: Vec<String> = (0..4).map(|i| format!("http://c.test/?i={i}")).collect();
    let urls: Vec<String> = slow.iter().chain(&blocked).chain(&fast).cloned().collect();

    let started = Instant::now();
    let mut stream = engine
        .fetch_all(urls, &FetchOptions::new().with_max_concurrency(12), CancellationToken::new())
        .unwrap();

    let mut arrivals = Vec::new();
    while let Some(result) = stream.next().await {
        arrivals.push((result, started.elapsed()));
    }
    assert_eq!(arrivals.len(), 12);

    let first_slow = arrivals
        .iter()
        .position(|(r, _)| r.url.contains("a.test"))
        .unwrap();
    for (position, (result, elapsed)) in arrivals.iter().enumerate() {
        if result.url.contains("b.test") {
            assert!(result.success, "{}", result.url);
            assert!(position < first_slow, "{} arrived after a slow result", result.url);
            assert!(*elapsed < Duration::from_millis(400), "{} took {elapsed:?}", result.url);
        }
        if result.url.contains("c.test") {
            assert_eq!(result.error_kind, Some(ErrorKind::RateLimited));
            assert!(position < first_slow, "{} arrived after a slow result", result.url);
        }
    }
    assert!(arrivals[first_slow].1 >= Duration::from_millis(450));
}

#[tokio::test]
async fn test_rate_limits_are_per_domain() {
    let server = TestServer::start().await;
    let settings = EngineSettings::new().with_rate_limit(RateLimitConfig::new(2, 100));
    let (engine, _sink) = server.engine(settings);

    let urls: Vec<String> = ["a.test", "b.test"]
        .iter()
        .flat_map(|host| (0..4).map(move |i| (host, i)))
        .map(|(host, i)| server.url(host, &format!("/page/{i}")))
        .collect();

    let results = engine
        .fetch_all(urls, &FetchOptions::new().with_max_concurrency(8), CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;
    assert_eq!(results.len(), 8);

    for host in ["a.test", "b.test"] {
        let of_host: Vec<&FetchResult> = results.iter().filter(|r| r.url.contains(host)).collect();
        let succeeded = of_host.iter().filter(|r| r.success).count();
        let limited = of_host
            .iter()
            .filter(|r| r.error_kind == Some(ErrorKind::RateLimited))
            .count();
        assert_eq!((succeeded, limited), (2, 2), "{host}");
    }
    assert_eq!(server.hits(), 4);
}

#[tokio::test]
async fn test_second_batch_served_from_cache() {
    let server = TestServer::start().await;
    let (engine, sink) = server.engine(generous_settings());
    let url = server.url("a.test", "/ok");
    let options = FetchOptions::new();

    let first = engine
        .fetch_all([&url], &options, CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;
    assert!(first[0].success);
    assert!(!first[0].from_cache);

    let second = engine
        .fetch_all([&url], &options, CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;
    assert!(second[0].success);
    assert!(second[0].from_cache);
    assert_eq!(second[0].body, first[0].body);

    assert_eq!(server.hits(), 1);
    assert_eq!(engine.limiter().state("a.test").await.unwrap().unwrap().minute_count, 1);
    assert_eq!(sink.with_status(SessionStatus::Cached).len(), 1);

    let bypass = engine
        .fetch_all([&url], &options.clone().with_cache(false), CancellationToken::new())
        .unwrap()
        .collect_all()
        .await;
    assert!(!bypass[0].from_cache);
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_too_many_requests_blocks_domain() {
    let server = TestServer::start().await;
    let (engine, _sink) = server.engine(generous_settings());

    let throttled = engine
        .fetch(&FetchRequest::new(server.url("a.test", "/throttle")))
        .await;
    assert_eq!(throttled.error_kind, Some(ErrorKind::Http(429)));

    let state = engine.limiter().state("a.test").await.unwrap().unwrap();
    assert!(state.blocked);
    assert!(state.blocked_until.is_some());

    let results = engine
        .fetch_all(
            [server.url("a.test", "/ok"), server.url("b.test", "/ok")],
            &FetchOptions::new(),
            CancellationToken::new(),
        )
        .unwrap()
        .collect_all()
        .await;

    let a = by_url(&results, &server.url("a.test", "/ok"));
    let b = by_url(&results, &server.url("b.test", "/ok"));
    assert_eq!(a.error_kind, Some(ErrorKind::RateLimited));
    assert!(b.success);
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_cancellation_mid_batch_accounts_for_every_url() {
    let server = TestServer::start().await;
    let (engine, sink) = server.engine(generous_settings());
    let urls: Vec<String> = (0..5).map(|i| server.url("a.test", &format!("/page/{i}"))).collect();
    let cancel = CancellationToken::new();

    let mut stream = engine
        .fetch_all(urls.clone(), &FetchOptions::new().with_max_concurrency(1), cancel.clone())
        .unwrap();

    let first = stream.next().await.unwrap();
    assert!(first.success);
    cancel.cancel("operator stop");

    let mut results = vec![first];
    while let Some(result) = stream.next().await {
        results.push(result);
    }

    assert_eq!(results.len(), 5);
    let seen: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(seen.len(), 5);

    let cancelled = results
        .iter()
        .filter(|r| r.error_kind == Some(ErrorKind::Cancelled))
        .count();
    assert!(cancelled >= 2, "only {cancelled} cancelled");
    assert_eq!(server.hits(), 5 - cancelled);
    assert_eq!(stream.progress().completed, 5);
    assert_eq!(sink.with_status(SessionStatus::Cancelled).len(), cancelled);
}

#[tokio::test]
async fn test_forbidden_through_proxy_blocks_proxy_for_domain() {
    let server = TestServer::start().await;
    // The test server answers absolute-form proxy requests by path.
    let proxy = ProxyRecord::new("127.0.0.1", server.addr.port());
    let proxy_id = proxy.id;
    let settings = generous_settings().with_proxy_enabled(true);
    let (engine, _sink) = server.engine_with_proxies(settings, vec![proxy]);

    let result = engine
        .fetch(&FetchRequest::new(server.url("a.test", "/forbidden")))
        .await;
    assert_eq!(result.error_kind, Some(ErrorKind::Http(403)));
    assert_eq!(result.proxy_used, Some(format!("127.0.0.1:{}", server.addr.port())));

    let record = engine.proxies().get(proxy_id).unwrap();
    assert!(record.blocked_domains.contains("a.test"));
    assert_eq!(record.failure_count, 1);
    assert!(engine.proxies().select("a.test").is_none());
    assert!(engine.proxies().select("b.test").is_some());

    let direct = engine
        .fetch(&FetchRequest::new(server.url("a.test", "/ok")))
        .await;
    assert!(direct.success);
    assert_eq!(direct.proxy_used, None);
}

#[tokio::test]
async fn test_progress_callback_sees_every_result() {
    let server = TestServer::start().await;
    let (engine, _sink) = server.engine(generous_settings());
    let urls: Vec<String> = (0..6).map(|i| server.url("b.test", &format!("/page/{i}"))).collect();

    let mut seen = Vec::new();
    let results = engine
        .fetch_all_with_progress(
            urls,
            &FetchOptions::new().with_max_concurrency(3),
            CancellationToken::new(),
            |result, completed, total| {
                seen.push((result.url.clone(), completed, total));
                Ok(())
            },
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 6);
    assert_eq!(
        seen.iter().map(|(_, completed, _)| *completed).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5, 6]
    );
    assert!(seen.iter().all(|(_, _, total)| *total == 6));
}
