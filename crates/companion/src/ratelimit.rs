//! Process-wide request rate limiting
//!
//! # RateLimiterStore
//!
//! One governor token bucket shared by every route, applied ahead of authentication.
//! It is deliberately not keyed by peer: the companion serves a single controller,
//! and a global bucket bounds both token guessing and general abuse.
//!
//! Default quota: one token every 200ms, burst of 10.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// Refill interval for one request token
const REFILL_PERIOD: Duration = Duration::from_millis(200);

/// Maximum burst size
const BURST: u32 = 10;

/// Shared direct (un-keyed) limiter
#[derive(Clone)]
pub struct RateLimiterStore {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimiterStore {
    /// Limiter with the default quota
    pub fn new() -> Self {
        Self::with_quota(REFILL_PERIOD, nonzero!(BURST))
    }

    /// Limiter with a custom refill period and burst
    ///
    /// A zero period is clamped to 1ms.
    pub fn with_quota(period: Duration, burst: NonZeroU32) -> Self {
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(nonzero!(1000u32)))
            .allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Take one token; `false` means the request must be rejected
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for RateLimiterStore {
    fn default() -> Self {
        Self::new()
    }
}
