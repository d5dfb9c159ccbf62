//! Per-key fixed window request throttling
//!
//! The first request for a key opens a window of fixed length. Requests in
//! that window share one counter; once it passes the limit the key is
//! refused until the window closes. Later requests never move the deadline.
//! A closed window is dropped either on the next request for its key or by
//! the reaper task, whichever comes first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("too many requests, retry in {}s", .retry_after.as_secs().max(1))]
pub struct RateLimited {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    closes_at: Instant,
    count: u32,
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, Window>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Count one request against `key`
    pub fn check(&self, key: &str) -> Result<(), RateLimited> {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if windows.get(key).is_some_and(|w| w.closes_at <= now) {
            windows.remove(key);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            closes_at: now + self.window,
            count: 0,
        });
        window.count = window.count.saturating_add(1);

        if window.count > self.max_requests {
            return Err(RateLimited {
                retry_after: window.closes_at.saturating_duration_since(now),
            });
        }
        Ok(())
    }

    /// Drop every elapsed window, returning how many were removed
    pub fn purge_elapsed(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| w.closes_at > now);
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }

    /// Periodically purge elapsed windows until shutdown
    pub async fn run_reaper(self, mut shutdown_rx: watch::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.window);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = self.purge_elapsed();
                    if purged > 0 {
                        tracing::trace!(purged, "rate limit windows purged");
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::debug!("rate limit reaper shutting down");
                    break;
                }
            }
        }
    }
}
