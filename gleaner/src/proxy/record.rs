//! Egress proxy records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::utils::Timestamp;

/// Transport spoken by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// Plain HTTP proxy.
    #[default]
    Http,
    /// HTTP proxy reached over TLS.
    Https,
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS5 proxy.
    Socks5,
}

impl ProxyKind {
    /// URL scheme used to address the proxy.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Username and password for an authenticated proxy.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCredentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl ProxyCredentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An egress proxy and its usage statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    /// Identifier.
    pub id: Uuid,
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Optional credentials.
    #[serde(default)]
    pub credentials: Option<ProxyCredentials>,
    /// Transport kind.
    #[serde(default)]
    pub kind: ProxyKind,
    /// Country the proxy exits from, if known.
    #[serde(default)]
    pub country: Option<String>,
    /// Whether the proxy may be used.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Whether the proxy is blocked for every domain.
    #[serde(default)]
    pub blocked: bool,
    /// Domains this proxy must not be used for.
    #[serde(default)]
    pub blocked_domains: BTreeSet<String>,
    /// Successful uses.
    #[serde(default)]
    pub success_count: u64,
    /// Failed uses.
    #[serde(default)]
    pub failure_count: u64,
    /// Mean latency over all reported uses, in milliseconds.
    #[serde(default)]
    pub avg_latency_ms: f64,
    /// Time of the last reported use.
    #[serde(default)]
    pub last_used: Option<Timestamp>,
}

fn default_active() -> bool {
    true
}

impl ProxyRecord {
    /// Creates an active, unblocked HTTP proxy record.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            port,
            credentials: None,
            kind: ProxyKind::default(),
            country: None,
            active: true,
            blocked: false,
            blocked_domains: BTreeSet::new(),
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: 0.0,
            last_used: None,
        }
    }

    /// Sets the transport kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ProxyKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: ProxyCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the exit country.
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// `host:port` address.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Proxy URL including scheme, without credentials.
    #[must_use]
    pub fn proxy_url(&self) -> String {
        format!("{}://{}", self.kind.scheme(), self.address())
    }

    /// Whether the proxy may be used for `domain`.
    #[must_use]
    pub fn is_eligible_for(&self, domain: &str) -> bool {
        self.active && !self.blocked && !self.blocked_domains.contains(domain)
    }

    /// Percentage of reported uses that succeeded, `0.0` when unused.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.success_count as f64 / total as f64 * 100.0;
        rate
    }

    /// Total reported uses.
    #[must_use]
    pub fn total_uses(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address(), self.kind)
    }
}
