//! Outbound request rate limiting.
//!
//! Each operation owns its own token bucket so that bursts of one kind of
//! request never delay the other.

use crate::types::{TarnhelmError, TarnhelmResult};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One search request per second
pub const SEARCH_PERIOD: Duration = Duration::from_secs(1);

/// Twenty fetches per minute
pub const FETCH_PERIOD: Duration = Duration::from_secs(3);

/// Rate limit settings for both operations
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Interval between search tokens
    pub search_period: Duration,

    /// Interval between fetch tokens
    pub fetch_period: Duration,

    /// Tokens available at once
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            search_period: SEARCH_PERIOD,
            fetch_period: FETCH_PERIOD,
            burst: 1,
        }
    }
}

/// Token-bucket limiter guarding one operation
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    limiter: Arc<GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    period: Duration,
}

impl RateLimiter {
    /// Limiter refilling one token every `period`, holding at most `burst`.
    ///
    /// A zero period is raised to one millisecond and a zero burst to one.
    pub fn new(name: &'static str, period: Duration, burst: u32) -> Self {
        let period = period.max(Duration::from_millis(1));
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);

        Self {
            name,
            limiter: Arc::new(GovRateLimiter::direct(quota)),
            period,
        }
    }

    /// Default limiter for search requests
    pub fn search() -> Self {
        Self::new("search", SEARCH_PERIOD, 1)
    }

    /// Default limiter for content fetches
    pub fn fetch() -> Self {
        Self::new("fetch", FETCH_PERIOD, 1)
    }

    /// Interval between tokens
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for a token.
    ///
    /// Fails with [`TarnhelmError::RateLimitCancelled`] when `deadline` has
    /// already passed or passes before a token is available.
    pub async fn admit(&self, deadline: Option<Instant>) -> TarnhelmResult<()> {
        let Some(deadline) = deadline else {
            self.limiter.until_ready().await;
            return Ok(());
        };

        if deadline <= Instant::now() {
            warn!(limiter = self.name, "Deadline already expired, not waiting for rate limit");
            return Err(TarnhelmError::RateLimitCancelled);
        }

        match tokio::time::timeout_at(deadline, self.limiter.until_ready()).await {
            Ok(()) => {
                debug!(limiter = self.name, "Rate limit admitted request");
                Ok(())
            },
            Err(_) => {
                warn!(limiter = self.name, "Deadline expired while waiting for rate limit");
                Err(TarnhelmError::RateLimitCancelled)
            },
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("period", &self.period)
            .finish()
    }
}
