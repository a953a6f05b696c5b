//! Per-identity request rate limiting
//!
//! Fixed-window counters keyed by caller identity in a concurrent map.
//! Windows are created lazily on first sight of an identity and evicted by a
//! periodic sweep once expired. The decision carries the numbers the HTTP
//! layer needs for the `X-RateLimit-*` and `Retry-After` headers.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { limit: u32, remaining: u32 },
    Denied { limit: u32, retry_after_secs: u64 },
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by caller identity
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn window_duration(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    /// Count one request against the identity's current window
    pub fn check(&self, identity: &str) -> RateDecision {
        if !self.config.enabled {
            return RateDecision::Allowed {
                limit: self.config.limit,
                remaining: self.config.limit,
            };
        }

        let now = Instant::now();
        let window = self.window_duration();
        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| Window {
                started_at: now,
                count: 0,
            });

        // Stale window: start a fresh one.
        if now.duration_since(entry.started_at) >= window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.config.limit {
            let elapsed = now.duration_since(entry.started_at);
            let retry_after = window.saturating_sub(elapsed);
            return RateDecision::Denied {
                limit: self.config.limit,
                retry_after_secs: retry_after.as_secs().max(1),
            };
        }

        entry.count += 1;
        RateDecision::Allowed {
            limit: self.config.limit,
            remaining: self.config.limit - entry.count,
        }
    }

    /// Drop windows that expired before `now`; returns evicted count
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let window = self.window_duration();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started_at) < window);
        before - self.windows.len()
    }

    /// Number of identities currently tracked
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}
