//! Search rate limiting over a rolling window
//!
//! The network bans clients that issue too many searches in a short time, so
//! every source-level search acquires a slot from the process-wide
//! [`SearchRateLimiter`] first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Process-wide search rate limiter
///
/// Allows at most `limit` acquisitions within any rolling `window`. Clones share
/// the same state.
///
/// # Algorithm
///
/// - The instants of recent acquisitions are kept in a queue
/// - Instants older than `window` are pruned on every acquisition
/// - When the queue is full the caller sleeps until the oldest entry expires
#[derive(Clone, Debug)]
pub struct SearchRateLimiter {
    limit: usize,
    window: Duration,
    issued: Arc<Mutex<VecDeque<Instant>>>,
}

impl SearchRateLimiter {
    /// Create a limiter allowing `limit` searches per `window`
    ///
    /// A limit of zero disables limiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use batchdl::rate_limiter::SearchRateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = SearchRateLimiter::new(34, Duration::from_secs(220));
    /// assert_eq!(limiter.limit(), 34);
    /// ```
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            issued: Arc::new(Mutex::new(VecDeque::with_capacity(limit))),
        }
    }

    /// Maximum searches per window
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Searches issued within the current window
    pub fn in_window(&self) -> usize {
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        Self::prune(&mut issued, self.window, Instant::now());
        issued.len()
    }

    /// Wait until a search may be issued, then record it
    pub async fn acquire(&self) {
        if self.limit == 0 {
            return;
        }

        loop {
            let wait = {
                let now = Instant::now();
                let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
                Self::prune(&mut issued, self.window, now);

                if issued.len() < self.limit {
                    issued.push_back(now);
                    return;
                }

                issued
                    .front()
                    .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                    .unwrap_or_default()
            };

            tracing::debug!(wait_ms = wait.as_millis(), "Search rate limit reached, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    fn prune(issued: &mut VecDeque<Instant>, window: Duration, now: Instant) {
        while let Some(oldest) = issued.front() {
            if now.saturating_duration_since(*oldest) >= window {
                issued.pop_front();
            } else {
                break;
            }
        }
    }
}
