//! Engine façade wiring every component together.
//!
//! [`EngineBuilder`] assembles the rate limiter, content cache, proxy pool,
//! fetcher, scheduler and extractor from one set of [`EngineSettings`].
//! Storage backends, the session sink and the clock can be swapped before
//! building.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::cache::{CacheStore, ContentCache, InMemoryCacheStore};
use crate::cancellation::CancellationToken;
use crate::config::{EngineSettings, FetchOptions};
use crate::errors::EngineError;
use crate::extract::{ExtractionConfig, ExtractionResult, Extractor, RelevanceScore, RelevanceScorer};
use crate::fetch::{ClientFactory, FetchRequest, FetchResult, Fetcher, LoggingSessionSink, SessionSink};
use crate::proxy::{ProxyPool, ProxyRecord};
use crate::ratelimit::{InMemoryRateLimitStore, RateLimitStore, RateLimiter};
use crate::scheduler::{BatchStream, Scheduler};
use crate::utils::{system_clock, Clock};

/// Builder for [`Engine`].
pub struct EngineBuilder {
    settings: EngineSettings,
    rate_store: Option<Arc<dyn RateLimitStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    proxies: Vec<ProxyRecord>,
    sink: Option<Arc<dyn SessionSink>>,
    clock: Option<Arc<dyn Clock>>,
    resolve: Vec<(String, SocketAddr)>,
    extraction: ExtractionConfig,
    scorer: RelevanceScorer,
}

impl EngineBuilder {
    /// Creates a builder from settings.
    #[must_use]
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            rate_store: None,
            cache_store: None,
            proxies: Vec::new(),
            sink: None,
            clock: None,
            resolve: Vec::new(),
            extraction: ExtractionConfig::default(),
            scorer: RelevanceScorer::default(),
        }
    }

    /// Uses `store` for rate-limit state instead of memory.
    #[must_use]
    pub fn with_rate_limit_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.rate_store = Some(store);
        self
    }

    /// Uses `store` for cached content instead of memory.
    #[must_use]
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Seeds the proxy pool.
    #[must_use]
    pub fn with_proxies(mut self, proxies: impl IntoIterator<Item = ProxyRecord>) -> Self {
        self.proxies.extend(proxies);
        self
    }

    /// Sets the sink receiving one session per fetch. Defaults to logging.
    #[must_use]
    pub fn with_session_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the clock shared by every component.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolves `host` to `addr` instead of using DNS.
    #[must_use]
    pub fn with_resolve(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.resolve.push((host.into(), addr));
        self
    }

    /// Sets the extraction selectors.
    #[must_use]
    pub fn with_extraction(mut self, config: ExtractionConfig) -> Self {
        self.extraction = config;
        self
    }

    /// Sets the relevance scorer.
    #[must_use]
    pub fn with_scorer(mut self, scorer: RelevanceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    /// Validates the settings and assembles the engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.settings.validate()?;
        let extractor = Extractor::new(&self.extraction)?;

        let clock = self.clock.unwrap_or_else(system_clock);
        let rate_store = self
            .rate_store
            .unwrap_or_else(|| Arc::new(InMemoryRateLimitStore::new()));
        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(InMemoryCacheStore::new()));

        let limiter = Arc::new(RateLimiter::with_clock(
            rate_store,
            self.settings.rate_limit,
            Arc::clone(&clock),
        ));
        let cache = Arc::new(ContentCache::with_clock(
            cache_store,
            self.settings.cache_ttl,
            Arc::clone(&clock),
        ));
        let proxies = Arc::new(
            ProxyPool::with_clock(self.settings.proxy_enabled, Arc::clone(&clock)).with_proxies(self.proxies),
        );

        let clients = self
            .resolve
            .into_iter()
            .fold(ClientFactory::new(&self.settings), |clients, (host, addr)| {
                clients.with_resolve(host, addr)
            });
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(LoggingSessionSink::default()));

        let fetcher = Arc::new(
            Fetcher::new(&self.settings, limiter, cache, proxies)
                .with_client_factory(clients)
                .with_session_sink(sink)
                .with_clock(clock),
        );

        tracing::info!(
            default_concurrency = self.settings.default_concurrency,
            per_minute = self.settings.rate_limit.per_minute,
            per_hour = self.settings.rate_limit.per_hour,
            proxy_enabled = self.settings.proxy_enabled,
            "Engine ready"
        );

        Ok(Engine {
            scheduler: Scheduler::new(Arc::clone(&fetcher)),
            fetcher,
            extractor,
            scorer: self.scorer,
            settings: self.settings,
        })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("settings", &self.settings)
            .field("proxies", &self.proxies.len())
            .field("resolve", &self.resolve)
            .finish_non_exhaustive()
    }
}

/// A ready-to-use content acquisition engine.
#[derive(Debug)]
pub struct Engine {
    settings: EngineSettings,
    fetcher: Arc<Fetcher>,
    scheduler: Scheduler,
    extractor: Extractor,
    scorer: RelevanceScorer,
}

impl Engine {
    /// Starts building an engine from settings.
    #[must_use]
    pub fn builder(settings: EngineSettings) -> EngineBuilder {
        EngineBuilder::new(settings)
    }

    /// Builds an engine with in-memory stores.
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        EngineBuilder::new(settings).build()
    }

    /// Loads settings from an optional TOML file and the environment, then builds.
    pub fn from_settings_file(path: Option<&std::path::Path>) -> Result<Self, EngineError> {
        Self::new(EngineSettings::load(path)?)
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Batch options derived from the settings.
    #[must_use]
    pub fn default_options(&self) -> FetchOptions {
        FetchOptions::from_settings(&self.settings)
    }

    /// Returns the fetcher.
    #[must_use]
    pub fn fetcher(&self) -> &Arc<Fetcher> {
        &self.fetcher
    }

    /// Returns the scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        self.fetcher.limiter()
    }

    /// Returns the content cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ContentCache> {
        self.fetcher.cache()
    }

    /// Returns the proxy pool.
    #[must_use]
    pub fn proxies(&self) -> &Arc<ProxyPool> {
        self.fetcher.proxies()
    }

    /// Fetches one URL.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchResult {
        self.fetcher.fetch(request).await
    }

    /// Starts a batch; see [`Scheduler::fetch_all`].
    pub fn fetch_all<I, S>(
        &self,
        urls: I,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> Result<BatchStream, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scheduler.fetch_all(urls, options, cancel)
    }

    /// Runs a batch with a progress callback; see [`Scheduler::fetch_all_with_progress`].
    pub async fn fetch_all_with_progress<I, S, F>(
        &self,
        urls: I,
        options: &FetchOptions,
        cancel: CancellationToken,
        callback: F,
    ) -> Result<Vec<FetchResult>, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&FetchResult, usize, usize) -> anyhow::Result<()>,
    {
        self.scheduler
            .fetch_all_with_progress(urls, options, cancel, callback)
            .await
    }

    /// Extracts text and links from `html`.
    #[must_use]
    pub fn extract(&self, html: &str, base_url: &str) -> ExtractionResult {
        self.extractor.extract(html, base_url)
    }

    /// Scores extracted text for relevance.
    #[must_use]
    pub fn score(&self, text: &str) -> RelevanceScore {
        self.scorer.score(text)
    }

    /// Extracts a fetched page and scores its text.
    ///
    /// Returns `None` for failed results and results without a body.
    #[must_use]
    pub fn analyze(&self, result: &FetchResult) -> Option<(ExtractionResult, RelevanceScore)> {
        if !result.success {
            return None;
        }
        let body = result.body.as_deref()?;
        let extraction = self.extract(body, &result.url);
        let score = self.score(&format!("{} {}", extraction.title, extraction.text));
        Some((extraction, score))
    }
}
