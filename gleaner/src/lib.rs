//! # Gleaner
//!
//! A concurrency-bounded web content acquisition engine.
//!
//! Gleaner fetches batches of URLs politely and turns the pages into text:
//!
//! - **Per-domain rate limiting**: minute and hour caps with explicit blocks
//! - **Content caching**: URL-keyed bodies with a time-to-live
//! - **Proxy rotation**: random selection with per-domain blocklists
//! - **Batch scheduling**: bounded concurrency, completion-ordered results, cancellation
//! - **Extraction**: main text, title and links, plus keyword relevance scoring
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gleaner::prelude::*;
//!
//! let engine = Engine::new(EngineSettings::load(None)?)?;
//!
//! let results = engine
//!     .fetch_all(urls, &engine.default_options(), CancellationToken::new())?
//!     .collect_all()
//!     .await;
//!
//! for result in &results {
//!     if let Some((page, score)) = engine.analyze(result) {
//!         println!("{} {:.2}", page.title, score.combined);
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod fetch;
pub mod observability;
pub mod proxy;
pub mod ratelimit;
pub mod scheduler;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheEntry, CacheStore, ContentCache, InMemoryCacheStore};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{CachePolicy, EngineSettings, FetchOptions, RateLimitConfig};
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::errors::{ConfigError, EngineError, ErrorKind, StoreError};
    pub use crate::extract::{
        ExtractedLink, ExtractionConfig, ExtractionResult, Extractor, RelevanceScore,
        RelevanceScorer, RelevanceThresholds, Vocabulary,
    };
    pub use crate::fetch::{
        FetchRequest, FetchResult, FetchSession, Fetcher, LoggingSessionSink, SessionSink,
        SessionStatus,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::proxy::{ProxyKind, ProxyPool, ProxyRecord};
    pub use crate::ratelimit::{InMemoryRateLimitStore, RateLimitState, RateLimitStore, RateLimiter};
    pub use crate::scheduler::{BatchStream, FetchProgress, Scheduler};
    pub use crate::utils::{Clock, Timestamp};
}
