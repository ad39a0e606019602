//! HTTP client construction and request headers.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, UPGRADE_INSECURE_REQUESTS};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

use crate::config::EngineSettings;
use crate::errors::EngineError;
use crate::proxy::ProxyRecord;

/// Desktop browser user agents rotated per request.
pub const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
];

/// Browser-like headers sent with every request.
#[must_use]
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

/// Chooses the User-Agent for one request.
#[derive(Debug, Clone)]
pub enum UserAgentPolicy {
    /// Always send the same value.
    Fixed(String),
    /// Pick uniformly from [`BROWSER_USER_AGENTS`].
    Rotate,
}

impl UserAgentPolicy {
    /// Derives the policy from settings.
    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        if settings.rotate_user_agent {
            Self::Rotate
        } else {
            Self::Fixed(settings.user_agent.clone())
        }
    }

    /// Returns the User-Agent for the next request.
    #[must_use]
    pub fn next(&self) -> String {
        match self {
            Self::Fixed(ua) => ua.clone(),
            Self::Rotate => BROWSER_USER_AGENTS
                .choose(&mut rand::thread_rng())
                .map_or_else(String::new, |ua| (*ua).to_string()),
        }
    }
}

/// Builds and caches one `reqwest::Client` per (egress path, redirect policy).
///
/// The egress path is the full proxy URL including credentials, so a proxy
/// whose address or credentials change gets a fresh client.
pub struct ClientFactory {
    connect_timeout: Duration,
    max_redirects: usize,
    resolve: Vec<(String, SocketAddr)>,
    clients: DashMap<(Option<String>, bool), Client>,
}

impl ClientFactory {
    /// Creates a factory configured from settings.
    #[must_use]
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout,
            max_redirects: settings.max_redirects,
            resolve: Vec::new(),
            clients: DashMap::new(),
        }
    }

    /// Pins `host` to `addr` instead of resolving it through DNS.
    ///
    /// A port given in the URL takes precedence over the port of `addr`.
    #[must_use]
    pub fn with_resolve(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.resolve.push((host.into(), addr));
        self.clients.clear();
        self
    }

    /// Returns the client for the given egress path, building it on first use.
    pub fn client_for(
        &self,
        proxy: Option<&ProxyRecord>,
        follow_redirects: bool,
    ) -> Result<Client, EngineError> {
        let proxy_url = proxy.map(proxy_url_with_auth).transpose()?;
        let key = (proxy_url.as_ref().map(Url::to_string), follow_redirects);
        if let Some(client) = self.clients.get(&key) {
            return Ok(client.clone());
        }

        let client = self.build(proxy_url, follow_redirects)?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    /// Drops clients whose proxy is not among `live`. Direct clients stay.
    ///
    /// Returns how many clients were dropped.
    pub fn prune<'a>(&self, live: impl IntoIterator<Item = &'a ProxyRecord>) -> usize {
        let live: HashSet<String> = live
            .into_iter()
            .filter_map(|proxy| proxy_url_with_auth(proxy).ok())
            .map(|url| url.to_string())
            .collect();

        let before = self.clients.len();
        self.clients
            .retain(|(url, _), _| url.as_ref().map_or(true, |url| live.contains(url)));
        before.saturating_sub(self.clients.len())
    }

    /// Number of cached clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client has been built yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn build(&self, proxy_url: Option<Url>, follow_redirects: bool) -> Result<Client, EngineError> {
        let redirect = if follow_redirects {
            Policy::limited(self.max_redirects)
        } else {
            Policy::none()
        };

        let mut builder = Client::builder()
            .default_headers(default_headers())
            .connect_timeout(self.connect_timeout)
            .redirect(redirect);

        for (host, addr) in &self.resolve {
            builder = builder.resolve(host, *addr);
        }

        builder = match proxy_url {
            Some(url) => builder.proxy(Proxy::all(url)?),
            None => builder.no_proxy(),
        };

        Ok(builder.build()?)
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("connect_timeout", &self.connect_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("resolve", &self.resolve)
            .field("clients", &self.clients.len())
            .finish()
    }
}

/// Proxy URL with credentials embedded as userinfo.
fn proxy_url_with_auth(proxy: &ProxyRecord) -> Result<Url, EngineError> {
    let mut url = Url::parse(&proxy.proxy_url())
        .map_err(|e| EngineError::Client(format!("Invalid proxy address {proxy}: {e}")))?;

    if let Some(ref creds) = proxy.credentials {
        url.set_username(&creds.username)
            .and_then(|()| url.set_password(Some(&creds.password)))
            .map_err(|()| EngineError::Client(format!("Cannot embed credentials for proxy {proxy}")))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyCredentials, ProxyKind};

    #[test]
    fn test_fixed_user_agent() {
        let policy = UserAgentPolicy::Fixed("gleaner-test".into());
        assert_eq!(policy.next(), "gleaner-test");
    }

    #[test]
    fn test_rotating_user_agent_from_list() {
        let policy = UserAgentPolicy::Rotate;
        for _ in 0..20 {
            assert!(BROWSER_USER_AGENTS.contains(&policy.next().as_str()));
        }
    }

    #[test]
    fn test_policy_from_settings() {
        let settings = EngineSettings::new().with_fixed_user_agent("bot/1.0");
        assert!(matches!(UserAgentPolicy::from_settings(&settings), UserAgentPolicy::Fixed(ref ua) if ua == "bot/1.0"));
        assert!(matches!(
            UserAgentPolicy::from_settings(&EngineSettings::default()),
            UserAgentPolicy::Rotate
        ));
    }

    #[test]
    fn test_proxy_url_with_auth() {
        let proxy = ProxyRecord::new("10.1.2.3", 1080)
            .with_kind(ProxyKind::Socks5)
            .with_credentials(ProxyCredentials::new("user", "p@ss"));
        let url = proxy_url_with_auth(&proxy).unwrap();
        assert_eq!(url.scheme(), "socks5");
        assert_eq!(url.username(), "user");
        assert_eq!(url.port(), Some(1080));
        assert!(url.password().is_some());
    }

    #[test]
    fn test_clients_are_cached_per_path() {
        let factory = ClientFactory::new(&EngineSettings::default());
        let proxy = ProxyRecord::new("127.0.0.1", 3128);

        factory.client_for(None, true).unwrap();
        factory.client_for(None, true).unwrap();
        factory.client_for(None, false).unwrap();
        factory.client_for(Some(&proxy), true).unwrap();
        assert_eq!(factory.len(), 3);

        assert_eq!(factory.prune(&[proxy.clone()]), 0);
        assert_eq!(factory.prune(std::iter::empty()), 1);
        assert_eq!(factory.len(), 2);
    }

    #[test]
    fn test_changed_proxy_address_gets_new_client() {
        let factory = ClientFactory::new(&EngineSettings::default());
        let proxy = ProxyRecord::new("127.0.0.1", 3128);
        let mut moved = proxy.clone();
        moved.port = 3129;

        factory.client_for(Some(&proxy), true).unwrap();
        factory.client_for(Some(&moved), true).unwrap();
        assert_eq!(factory.len(), 2);

        assert_eq!(factory.prune(&[moved]), 1);
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn test_default_headers() {
        let headers = default_headers();
        assert!(headers.contains_key(ACCEPT));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
    }
}
