//! URL and domain helpers.

use url::Url;

/// Extracts the partition domain from a URL.
///
/// The domain is the lower-cased host without port, so `http://a.test:8080/x`
/// and `http://A.test/y` share rate-limit and proxy state.
#[must_use]
pub fn extract_domain(url: &str) -> Option<String> {
    Url::parse(url).ok().and_then(|u| domain_of(&u))
}

/// Returns the partition domain of an already parsed URL.
#[must_use]
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Checks if two URLs are on the same domain.
#[must_use]
pub fn same_domain(url1: &str, url2: &str) -> bool {
    match (extract_domain(url1), extract_domain(url2)) {
        (Some(d1), Some(d2)) => d1 == d2,
        _ => false,
    }
}
