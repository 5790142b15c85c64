// Copyright (c) James Kassemi, SC, US. All rights reserved.
use std::collections::HashMap;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::RwLock;
use tokio::time::{Instant, sleep_until};

use crate::config::RetrySettings;

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);
pub const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const INITIAL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Backoff {
    retry_at: Instant,
    interval: Duration,
}

/// Keyed exponential backoff for reconnect scheduling.
///
/// The first failure of a key blocks it for one second; every further failure doubles the
/// interval up to `max_interval`. Successful callers `delete` the key to reset it.
#[derive(Debug)]
pub struct RetryLimiter {
    entries: RwLock<HashMap<String, Backoff>>,
    max_interval: Duration,
}

impl RetryLimiter {
    pub fn new(max_interval: Duration) -> Self {
        if max_interval < INITIAL_INTERVAL {
            warn!("retry max interval {max_interval:?} is below {INITIAL_INTERVAL:?}; clamping");
        }
        Self {
            entries: RwLock::new(HashMap::new()),
            max_interval: max_interval.max(INITIAL_INTERVAL),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(Duration::from_secs(settings.max_interval_secs))
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Records a failure for `key` and returns the interval it is now blocked for.
    pub fn failed(&self, key: &str) -> Duration {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let interval = match entries.get(key) {
            Some(prev) => prev.interval.saturating_mul(2).min(self.max_interval),
            None => INITIAL_INTERVAL,
        };
        entries.insert(
            key.to_string(),
            Backoff {
                retry_at: now + interval,
                interval,
            },
        );
        debug!("retry backoff for {key}: {interval:?}");
        interval
    }

    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Returns `true` when `key` has no pending backoff.
    pub fn allow(&self, key: &str) -> bool {
        match self.retry_at(key) {
            Some(at) => Instant::now() >= at,
            None => true,
        }
    }

    pub fn retry_at(&self, key: &str) -> Option<Instant> {
        self.entries.read().get(key).map(|b| b.retry_at)
    }

    /// Sleeps until `key` is allowed again. Returns immediately for unknown keys.
    pub async fn wait(&self, key: &str) {
        if let Some(at) = self.retry_at(key) {
            sleep_until(at).await;
        }
    }

    /// Blocking flavour of [`RetryLimiter::wait`] for plain threads.
    pub fn wait_blocking(&self, key: &str) {
        if let Some(at) = self.retry_at(key) {
            let remaining = at.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
            }
        }
    }
}

impl Default for RetryLimiter {
    fn default() -> Self {
        Self::new(DAY)
    }
}
