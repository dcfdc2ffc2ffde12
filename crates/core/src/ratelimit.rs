//! Per-caller sliding window rate limiting.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rate limit settings applied to every limited route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests allowed per key inside one window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    120
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
        }
    }
}

/// What a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub user: String,
    pub route: String,
    pub resource: Option<String>,
}

impl RateLimitKey {
    pub fn new(user: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            route: route.into(),
            resource: None,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests still available in the current window after this one.
    pub remaining: u32,
    /// Seconds until the oldest counted request leaves the window. Zero when allowed.
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    pub fn into_result(self) -> Result<Self, RateLimitExceededError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitExceededError {
                retry_after_secs: self.retry_after_secs,
            })
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit exceeded, retry after {retry_after_secs}s")]
pub struct RateLimitExceededError {
    pub retry_after_secs: u64,
}

/// Sliding window limiter. `check` counts and decides under one lock, so
/// two concurrent callers can never both take the last slot.
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: u32,
    hits: Mutex<HashMap<RateLimitKey, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(Duration::from_secs(config.window_secs), config.max_requests)
    }

    pub fn check(&self, key: &RateLimitKey) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &RateLimitKey, now: Instant) -> RateLimitDecision {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entries = hits.entry(key.clone()).or_default();

        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() as u32 >= self.max_requests {
            let retry_after = entries
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);
            // Round up so clients never retry a moment too early.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs: secs.max(1),
            };
        }

        entries.push_back(now);
        RateLimitDecision {
            allowed: true,
            remaining: self.max_requests - entries.len() as u32,
            retry_after_secs: 0,
        }
    }

    /// Drop keys with no hits inside the window.
    pub fn prune(&self) {
        let now = Instant::now();
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = self.window;
        hits.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
    }
}
