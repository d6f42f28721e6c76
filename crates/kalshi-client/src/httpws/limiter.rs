//! Client-side request pacing
//!
//! Reads and writes each get their own token bucket holding a single
//! token that refills once per interval. The buckets never share state,
//! so a read waiting for its slot does not hold up a write.
//!
//! Uses the `governor` crate (GCRA); concurrent callers of the same kind
//! are granted distinct slots at least one interval apart.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use tracing::debug;

use crate::config::DEFAULT_RATE_INTERVAL;

type Limiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Request class for pacing purposes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// Minimum-interval limiter for read and write requests
pub struct RateLimiter {
    read_interval: Duration,
    write_interval: Duration,
    /// `None` when the interval is zero (pacing disabled)
    read_limiter: Option<Arc<Limiter>>,
    write_limiter: Option<Arc<Limiter>>,
}

impl RateLimiter {
    pub fn new(read_interval: Duration, write_interval: Duration) -> Self {
        Self {
            read_interval,
            write_interval,
            read_limiter: Self::create_limiter(read_interval),
            write_limiter: Self::create_limiter(write_interval),
        }
    }

    /// One request per `interval`, no burst
    fn create_limiter(interval: Duration) -> Option<Arc<Limiter>> {
        Quota::with_period(interval)
            .map(|quota| Arc::new(GovernorRateLimiter::direct(quota.allow_burst(NonZeroU32::MIN))))
    }

    pub fn interval(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Read => self.read_interval,
            RequestKind::Write => self.write_interval,
        }
    }

    /// Wait until a slot of `kind` is free and take it
    pub async fn await_slot(&self, kind: RequestKind) {
        let limiter = match kind {
            RequestKind::Read => &self.read_limiter,
            RequestKind::Write => &self.write_limiter,
        };

        if let Some(limiter) = limiter {
            debug!("Checking {:?} rate limit", kind);
            limiter.until_ready().await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_INTERVAL, DEFAULT_RATE_INTERVAL)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("read_interval", &self.read_interval)
            .field("write_interval", &self.write_interval)
            .finish()
    }
}
