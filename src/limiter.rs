//! Fixed-window rate limiter keyed by client identity

use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Window map size above which elapsed windows are swept on insert
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    window_reset_at: Instant,
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Refused until the current window resets
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_seconds),
            max_requests: config.max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request against `client` and report whether it may proceed
    ///
    /// The first request (or the first after a reset) opens a window with a
    /// count of one. Refused requests do not increment the count.
    pub fn check(&self, client: &str) -> RateDecision {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if windows.len() >= SWEEP_THRESHOLD && !windows.contains_key(client) {
            windows.retain(|_, w| now < w.window_reset_at);
        }

        match windows.get_mut(client) {
            Some(w) if now < w.window_reset_at => {
                if w.count >= self.max_requests {
                    return RateDecision::Limited {
                        retry_after: w.window_reset_at - now,
                    };
                }
                w.count += 1;
            }
            _ => {
                windows.insert(
                    client.to_string(),
                    RateWindow {
                        count: 1,
                        window_reset_at: now + self.window,
                    },
                );
            }
        }
        RateDecision::Allowed
    }

    /// Boolean form of [`check`](Self::check)
    pub fn allow(&self, client: &str) -> bool {
        self.check(client).is_allowed()
    }

    /// Identities whose current window is full
    pub fn limited_identities(&self) -> usize {
        let now = Instant::now();
        self.windows
            .lock()
            .values()
            .filter(|w| now < w.window_reset_at && w.count >= self.max_requests)
            .count()
    }

    /// Drop windows that have elapsed; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| now < w.window_reset_at);
        before - windows.len()
    }

    pub fn tracked_identities(&self) -> usize {
        self.windows.lock().len()
    }
}
