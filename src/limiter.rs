//! Sliding-window rate limiter shared process-wide.
//!
//! Construct one [`RateLimiter`] at startup and inject it (behind an `Arc`)
//! into every component that issues outbound provider calls. Over any
//! trailing `period` interval, admitted calls never exceed `calls`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// How often [`RateLimiter::wait`] re-checks admission.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sliding-window admission control.
///
/// The window of admission timestamps is owned exclusively by the limiter
/// and pruned to the trailing `period` on every check. Mutation is
/// serialized with a mutex so concurrent requests cannot lose updates.
pub struct RateLimiter {
    calls: usize,
    period: Duration,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `calls` admissions per `period`.
    pub fn new(calls: usize, period: Duration) -> Self {
        Self {
            calls,
            period,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to admit one call right now.
    ///
    /// Prunes timestamps older than `period`, then admits and records a new
    /// timestamp only if the pruned window still has room.
    pub fn try_admit(&self) -> bool {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.period {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.calls {
            window.push_back(now);
            true
        } else {
            warn!(calls = self.calls, period_secs = self.period.as_secs_f64(), "Rate limit exceeded");
            false
        }
    }

    /// Suspend until a call is admitted.
    ///
    /// Polls [`try_admit`](Self::try_admit) at a fixed short interval.
    /// Callers needing a hard bound must wrap this in their own timeout.
    pub async fn wait(&self) {
        while !self.try_admit() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
