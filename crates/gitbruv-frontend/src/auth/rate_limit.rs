use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::config::AuthConfig;

/// Per-key failure counter: after `max_failures` failures inside `window`
/// the key is locked out for `lockout`.
pub struct AuthRateLimiter {
    failures: DashMap<String, (u32, Instant)>,
    max_failures: u32,
    window: Duration,
    lockout: Duration,
}

impl AuthRateLimiter {
    pub fn new(max_failures: u32, window: Duration, lockout: Duration) -> Self {
        Self {
            failures: DashMap::new(),
            max_failures,
            window,
            lockout,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.max_failures,
            Duration::from_secs(config.window_secs),
            Duration::from_secs(config.lockout_secs),
        )
    }

    /// Whether an attempt for `key` may proceed.
    pub fn check(&self, key: &str) -> bool {
        let expired = match self.failures.get(key) {
            Some(entry) => {
                let (count, since) = *entry;
                if count >= self.max_failures {
                    if since.elapsed() < self.lockout {
                        return false;
                    }
                    true
                } else {
                    since.elapsed() >= self.window
                }
            }
            None => false,
        };
        if expired {
            self.failures.remove(key);
        }
        true
    }

    pub fn record_failure(&self, key: &str) {
        self.failures
            .entry(key.to_string())
            .and_modify(|(count, since)| {
                if since.elapsed() >= self.window {
                    *count = 1;
                    *since = Instant::now();
                } else {
                    *count += 1;
                    if *count >= self.max_failures {
                        *since = Instant::now();
                    }
                }
            })
            .or_insert((1, Instant::now()));
    }

    pub fn clear(&self, key: &str) {
        self.failures.remove(key);
    }
}
