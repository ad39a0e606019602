//! Single-URL fetching.
//!
//! This module provides:
//! - FetchRequest and FetchResult, the per-URL input and outcome
//! - Fetcher, one GET composed from the rate limiter, cache and proxy pool
//! - ClientFactory, cached `reqwest` clients per egress path
//! - FetchSession and SessionSink, one observability record per fetch

mod client;
mod fetcher;
mod models;
mod session;

pub use client::{default_headers, ClientFactory, UserAgentPolicy, BROWSER_USER_AGENTS};
pub use fetcher::{FetchLimits, Fetcher};
pub use models::{FetchRequest, FetchResult};
pub use session::{
    CollectingSessionSink, FetchSession, LoggingSessionSink, NoOpSessionSink, SessionSink,
    SessionStatus,
};
