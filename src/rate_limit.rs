//! Per-key cooldown gate for outgoing alerts.
//!
//! The limiter remembers when each key was last let through and refuses the
//! same key again until the configured window has elapsed. State lives only
//! in memory, so short-lived processes start with an empty history.

use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::time::Instant;
use tracing::trace;

/// Number of tracked keys above which stale entries are swept.
const SWEEP_THRESHOLD: usize = 100;

/// A thread-safe, per-key rate limiter.
pub struct RateLimiter {
    window: Duration,
    last_allowed: Mutex<HashMap<String, Instant>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter backed by the system clock.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    /// Creates a limiter with an explicit time source.
    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            last_allowed: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` and records the current time if `key` has not been let
    /// through within the window. Returns `false` without touching state otherwise.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut last_allowed = self.lock();

        if last_allowed.len() > SWEEP_THRESHOLD {
            let before = last_allowed.len();
            let window = self.window;
            last_allowed.retain(|_, seen| now.saturating_duration_since(*seen) <= window);
            trace!(
                swept = before - last_allowed.len(),
                remaining = last_allowed.len(),
                "Swept stale rate limiter entries"
            );
        }

        match last_allowed.get(key) {
            Some(seen) if now.saturating_duration_since(*seen) < self.window => false,
            _ => {
                last_allowed.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forgets the history for a single key.
    pub fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Forgets the history for every key.
    pub fn reset_all(&self) {
        self.lock().clear();
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.last_allowed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("tracked_keys", &self.len())
            .finish()
    }
}
