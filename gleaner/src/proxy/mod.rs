//! Egress proxy rotation.
//!
//! This module provides:
//! - ProxyRecord, a proxy with its usage statistics and per-domain blocklist
//! - ProxyPool, uniform selection among eligible proxies and outcome reporting

mod pool;
mod record;

pub use pool::ProxyPool;
pub use record::{ProxyCredentials, ProxyKind, ProxyRecord};
