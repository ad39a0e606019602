//! Per-domain rate limiter.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{InMemoryRateLimitStore, RateLimitState, RateLimitStore};
use crate::config::RateLimitConfig;
use crate::errors::StoreError;
use crate::utils::{system_clock, Clock, Timestamp};

/// Enforces minute and hour caps per domain.
///
/// All reads and writes for one domain run under that domain's lock; other
/// domains proceed independently. Store failures never halt fetching:
/// [`allow`](Self::allow) fails open and [`record`](Self::record) only logs.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    caps: RateLimitConfig,
    clock: Arc<dyn Clock>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RateLimiter {
    /// Creates a limiter over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>, caps: RateLimitConfig) -> Self {
        Self::with_clock(store, caps, system_clock())
    }

    /// Creates a limiter backed by a fresh in-memory store.
    #[must_use]
    pub fn in_memory(caps: RateLimitConfig) -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()), caps)
    }

    /// Creates a limiter that reads time from `clock`.
    #[must_use]
    pub fn with_clock(
        store: Arc<dyn RateLimitStore>,
        caps: RateLimitConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            caps,
            clock,
            locks: DashMap::new(),
        }
    }

    /// Returns the configured caps.
    #[must_use]
    pub fn caps(&self) -> &RateLimitConfig {
        &self.caps
    }

    /// Asks whether a request to `domain` may be issued now.
    ///
    /// A `true` answer reserves one slot that the caller must settle with
    /// [`record`](Self::record) or [`release`](Self::release).
    pub async fn allow(&self, domain: &str) -> bool {
        let caps = self.caps;
        let result = self
            .with_state(domain, |state, now| {
                let mut dirty = state.roll_windows(now);
                dirty |= state.clear_expired_block(now);

                if state.is_blocked_at(now) {
                    debug!(domain = %state.domain, reason = ?state.block_reason, "Domain blocked");
                    return (false, dirty);
                }
                if !state.has_capacity(&caps) {
                    debug!(
                        domain = %state.domain,
                        minute_count = state.minute_count,
                        hour_count = state.hour_count,
                        in_flight = state.in_flight,
                        "Domain over budget"
                    );
                    return (false, dirty);
                }

                state.in_flight += 1;
                (true, true)
            })
            .await;

        match result {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(domain, error = %e, "Rate limit check failed, allowing request");
                true
            }
        }
    }

    /// Like [`allow`](Self::allow), but returns the slot as a guard.
    ///
    /// A guard dropped without being settled releases its slot, so a fetch
    /// that panics or is dropped mid-flight cannot leak capacity.
    pub async fn reserve(self: &Arc<Self>, domain: &str) -> Option<Reservation> {
        self.allow(domain).await.then(|| Reservation {
            limiter: Arc::clone(self),
            domain: domain.to_string(),
            settled: false,
        })
    }

    /// Records one attempted request against `domain`.
    ///
    /// Settles a reservation taken by [`allow`](Self::allow) if one is open.
    pub async fn record(&self, domain: &str) {
        let result = self
            .with_state(domain, |state, now| {
                state.roll_windows(now);
                state.minute_count = state.minute_count.saturating_add(1);
                state.hour_count = state.hour_count.saturating_add(1);
                state.in_flight = state.in_flight.saturating_sub(1);
                state.last_request_at = Some(now);
                ((), true)
            })
            .await;

        if let Err(e) = result {
            warn!(domain, error = %e, "Failed to record request");
        }
    }

    /// Drops a reservation without counting a request.
    pub async fn release(&self, domain: &str) {
        let result = self
            .with_state(domain, |state, _now| {
                let dirty = state.in_flight > 0;
                state.in_flight = state.in_flight.saturating_sub(1);
                ((), dirty)
            })
            .await;

        if let Err(e) = result {
            warn!(domain, error = %e, "Failed to release reservation");
        }
    }

    /// Blocks `domain` until `until`, or until unblocked when `None`.
    pub async fn block(
        &self,
        domain: &str,
        until: Option<Timestamp>,
        reason: impl Into<String>,
    ) -> Result<(), StoreError> {
        let reason = reason.into();
        self.with_state(domain, |state, _now| {
            state.blocked = true;
            state.blocked_until = until;
            state.block_reason = Some(reason);
            ((), true)
        })
        .await?;
        debug!(domain, ?until, "Domain blocked");
        Ok(())
    }

    /// Lifts any block on `domain`.
    pub async fn unblock(&self, domain: &str) -> Result<(), StoreError> {
        self.with_state(domain, |state, _now| {
            let dirty = state.blocked;
            state.blocked = false;
            state.blocked_until = None;
            state.block_reason = None;
            ((), dirty)
        })
        .await
    }

    /// Returns a snapshot of the state for `domain`, if any.
    pub async fn state(&self, domain: &str) -> Result<Option<RateLimitState>, StoreError> {
        let lock = self.lock_for(domain);
        let _guard = lock.lock().await;
        self.store.load(domain).await
    }

    fn lock_for(&self, domain: &str) -> Arc<Mutex<()>> {
        self.locks.entry(domain.to_string()).or_default().clone()
    }

    /// Runs `f` on the domain's state under its lock, saving when `f` reports a change.
    async fn with_state<T, F>(&self, domain: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut RateLimitState, Timestamp) -> (T, bool),
    {
        let lock = self.lock_for(domain);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let (mut state, created) = match self.store.load(domain).await? {
            Some(state) => (state, false),
            None => (RateLimitState::new(domain, now), true),
        };

        let (value, dirty) = f(&mut state, now);
        if dirty || created {
            self.store.save(state).await?;
        }
        Ok(value)
    }
}

/// One open slot taken by [`RateLimiter::reserve`].
#[must_use = "a dropped reservation is released without counting a request"]
pub struct Reservation {
    limiter: Arc<RateLimiter>,
    domain: String,
    settled: bool,
}

impl Reservation {
    /// The reserved domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Counts the request and closes the slot.
    pub async fn record(mut self) {
        self.settled = true;
        self.limiter.record(&self.domain).await;
    }

    /// Closes the slot without counting a request.
    pub async fn release(mut self) {
        self.settled = true;
        self.limiter.release(&self.domain).await;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let limiter = Arc::clone(&self.limiter);
        let domain = std::mem::take(&mut self.domain);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(domain = %domain, "Releasing unsettled reservation");
                handle.spawn(async move { limiter.release(&domain).await });
            }
            Err(_) => warn!(domain = %domain, "Reservation dropped outside a runtime, slot not released"),
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("domain", &self.domain)
            .field("settled", &self.settled)
            .finish()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("caps", &self.caps)
            .field("domains", &self.locks.len())
            .finish()
    }
}
