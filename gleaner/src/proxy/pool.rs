//! Proxy selection and bookkeeping.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::ProxyRecord;
use crate::utils::{system_clock, Clock};

/// Pool of egress proxies.
///
/// Selection is uniform among proxies eligible for the requested domain.
/// The pool records outcomes but never blocks a proxy on its own; callers
/// decide when a proxy should be excluded.
pub struct ProxyPool {
    proxies: DashMap<Uuid, ProxyRecord>,
    enabled: bool,
    clock: Arc<dyn Clock>,
}

impl ProxyPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self::with_clock(enabled, system_clock())
    }

    /// Creates a disabled pool; `select` always returns `None`.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Creates an empty pool that reads time from `clock`.
    #[must_use]
    pub fn with_clock(enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            proxies: DashMap::new(),
            enabled,
            clock,
        }
    }

    /// Adds proxies to the pool.
    #[must_use]
    pub fn with_proxies(self, proxies: impl IntoIterator<Item = ProxyRecord>) -> Self {
        for proxy in proxies {
            self.add(proxy);
        }
        self
    }

    /// Whether proxies are used at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Adds or replaces a proxy. Returns its id.
    pub fn add(&self, proxy: ProxyRecord) -> Uuid {
        let id = proxy.id;
        debug!(proxy = %proxy, %id, "Proxy added");
        self.proxies.insert(id, proxy);
        id
    }

    /// Removes a proxy.
    pub fn remove(&self, id: Uuid) -> Option<ProxyRecord> {
        self.proxies.remove(&id).map(|(_, proxy)| proxy)
    }

    /// Returns a snapshot of one proxy.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<ProxyRecord> {
        self.proxies.get(&id).map(|p| p.clone())
    }

    /// Returns snapshots of all proxies.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ProxyRecord> {
        self.proxies.iter().map(|p| p.clone()).collect()
    }

    /// Number of proxies, eligible or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Whether the pool holds no proxies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Picks a proxy for `domain` uniformly among eligible ones.
    ///
    /// Returns `None` when the pool is disabled or nothing is eligible.
    #[must_use]
    pub fn select(&self, domain: &str) -> Option<ProxyRecord> {
        if !self.enabled {
            return None;
        }

        let eligible: Vec<ProxyRecord> = self
            .proxies
            .iter()
            .filter(|p| p.is_eligible_for(domain))
            .map(|p| p.clone())
            .collect();

        let chosen = eligible.choose(&mut rand::thread_rng()).cloned();
        if chosen.is_none() && !self.proxies.is_empty() {
            debug!(domain, "No eligible proxy");
        }
        chosen
    }

    /// Records the outcome of one use of a proxy.
    ///
    /// Returns `false` if the proxy is unknown.
    pub fn report(&self, id: Uuid, domain: &str, success: bool, latency: Duration) -> bool {
        let Some(mut proxy) = self.proxies.get_mut(&id) else {
            return false;
        };

        if success {
            proxy.success_count += 1;
        } else {
            proxy.failure_count += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let uses = proxy.total_uses() as f64;
        let sample = latency.as_secs_f64() * 1000.0;
        proxy.avg_latency_ms += (sample - proxy.avg_latency_ms) / uses;
        proxy.last_used = Some(self.clock.now());

        debug!(
            proxy = %proxy.address(),
            domain,
            success,
            latency_ms = sample,
            "Proxy use reported"
        );
        true
    }

    /// Excludes a proxy from selection for `domain`.
    pub fn block_for_domain(&self, id: Uuid, domain: &str) -> bool {
        self.update(id, |proxy| {
            if proxy.blocked_domains.insert(domain.to_string()) {
                info!(proxy = %proxy.address(), domain, "Proxy blocked for domain");
            }
        })
    }

    /// Makes a proxy selectable for `domain` again.
    pub fn unblock_for_domain(&self, id: Uuid, domain: &str) -> bool {
        self.update(id, |proxy| {
            proxy.blocked_domains.remove(domain);
        })
    }

    /// Blocks or unblocks a proxy for every domain.
    pub fn set_blocked(&self, id: Uuid, blocked: bool) -> bool {
        self.update(id, |proxy| proxy.blocked = blocked)
    }

    /// Activates or deactivates a proxy.
    pub fn set_active(&self, id: Uuid, active: bool) -> bool {
        self.update(id, |proxy| proxy.active = active)
    }

    fn update(&self, id: Uuid, f: impl FnOnce(&mut ProxyRecord)) -> bool {
        match self.proxies.get_mut(&id) {
            Some(mut proxy) => {
                f(&mut proxy);
                true
            }
            None => false,
        }
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPool")
            .field("enabled", &self.enabled)
            .field("proxies", &self.proxies.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn pool_with(n: u16) -> (ProxyPool, Vec<Uuid>) {
        let pool = ProxyPool::new(true);
        let ids = (0..n)
            .map(|i| pool.add(ProxyRecord::new(format!("10.0.0.{i}"), 8080)))
            .collect();
        (pool, ids)
    }

    #[test]
    fn test_disabled_pool_selects_nothing() {
        let pool = ProxyPool::disabled().with_proxies([ProxyRecord::new("p", 1)]);
        assert_eq!(pool.len(), 1);
        assert!(pool.select("a.test").is_none());
    }

    #[test]
    fn test_empty_pool_selects_nothing() {
        let pool = ProxyPool::new(true);
        assert!(pool.is_empty());
        assert!(pool.select("a.test").is_none());
    }

    #[test]
    fn test_selection_spreads_across_eligible() {
        let (pool, ids) = pool_with(3);
        let seen: HashSet<Uuid> = (0..300)
            .filter_map(|_| pool.select("a.test"))
            .map(|p| p.id)
            .collect();
        assert_eq!(seen, ids.into_iter().collect());
    }

    #[test]
    fn test_domain_block_is_never_selected() {
        let (pool, ids) = pool_with(3);
        assert!(pool.block_for_domain(ids[0], "a.test"));

        for _ in 0..200 {
            let chosen = pool.select("a.test").unwrap();
            assert_ne!(chosen.id, ids[0]);
        }
        let other: HashSet<Uuid> = (0..200)
            .filter_map(|_| pool.select("b.test"))
            .map(|p| p.id)
            .collect();
        assert!(other.contains(&ids[0]));

        assert!(pool.unblock_for_domain(ids[0], "a.test"));
        let seen: HashSet<Uuid> = (0..300)
            .filter_map(|_| pool.select("a.test"))
            .map(|p| p.id)
            .collect();
        assert!(seen.contains(&ids[0]));
    }

    #[test]
    fn test_inactive_and_blocked_excluded() {
        let (pool, ids) = pool_with(2);
        pool.set_active(ids[0], false);
        pool.set_blocked(ids[1], true);
        assert!(pool.select("a.test").is_none());

        pool.set_blocked(ids[1], false);
        assert_eq!(pool.select("a.test").unwrap().id, ids[1]);
    }

    #[test]
    fn test_report_updates_counters_and_mean_latency() {
        let clock = ManualClock::starting_now();
        let pool = ProxyPool::with_clock(true, Arc::new(clock.clone()));
        let id = pool.add(ProxyRecord::new("p", 1));

        assert!(pool.report(id, "a.test", true, Duration::from_millis(100)));
        assert!(pool.report(id, "a.test", false, Duration::from_millis(300)));
        assert!(pool.report(id, "a.test", true, Duration::from_millis(200)));

        let proxy = pool.get(id).unwrap();
        assert_eq!(proxy.success_count, 2);
        assert_eq!(proxy.failure_count, 1);
        assert!((proxy.avg_latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(proxy.last_used, Some(clock.now()));
        assert!(proxy.blocked_domains.is_empty());
    }

    #[test]
    fn test_unknown_proxy_operations() {
        let pool = ProxyPool::new(true);
        let id = Uuid::new_v4();
        assert!(!pool.report(id, "a.test", true, Duration::ZERO));
        assert!(!pool.block_for_domain(id, "a.test"));
        assert!(!pool.set_active(id, false));
        assert!(pool.remove(id).is_none());
    }

    #[test]
    fn test_remove() {
        let (pool, ids) = pool_with(1);
        let removed = pool.remove(ids[0]).unwrap();
        assert_eq!(removed.id, ids[0]);
        assert!(pool.is_empty());
    }
}
