//! Fixed-window rate limiting
//!
//! Tracks outgoing requests against a single counting window. The window
//! boundary is recomputed lazily on every query instead of by a timer, and
//! the server is authoritative: limits, periods and counts reported in
//! response headers replace local tracking.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for rate limiting
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub limit: u32,
    /// Window duration
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::planning_center()
    }
}

impl RateLimitConfig {
    /// Create a new rate limit config
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
        }
    }

    /// Planning Center default: 100 requests every 20 seconds
    pub fn planning_center() -> Self {
        Self::new(100, Duration::from_secs(20))
    }

    /// Effectively unlimited (for tests or local services)
    pub fn unlimited() -> Self {
        Self::new(u32::MAX, Duration::from_secs(1))
    }

    /// Builder: set limit
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Builder: set window duration
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Rate-limit values reported by the server on a response.
///
/// Every field is optional; absent values leave local tracking untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitHeaders {
    /// Requests allowed per period
    pub limit: Option<u32>,
    /// Period length
    pub period: Option<Duration>,
    /// Requests already counted in the current period
    pub count: Option<u32>,
    /// Server-requested delay before the next request
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// True when the response carried no rate-limit information at all
    pub fn is_empty(&self) -> bool {
        self.limit.is_none()
            && self.period.is_none()
            && self.count.is_none()
            && self.retry_after.is_none()
    }
}

/// Parse a `Retry-After` header value given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Snapshot of the counting window
#[derive(Debug, Clone, Copy)]
pub struct RateLimitState {
    pub limit: u32,
    pub window_start: Instant,
    pub window_duration: Duration,
    pub request_count: u32,
}

impl RateLimitState {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            limit: config.limit,
            window_start: now,
            window_duration: config.window,
            request_count: 0,
        }
    }

    /// Start a fresh window once the current one has elapsed.
    fn roll(&mut self, now: Instant) {
        if now >= self.window_start + self.window_duration {
            self.window_start = now;
            self.request_count = 0;
        }
    }

    fn can_proceed(&mut self, now: Instant) -> bool {
        self.roll(now);
        // A window pushed into the future by Retry-After holds every request.
        if now < self.window_start {
            return false;
        }
        self.request_count < self.limit
    }

    fn time_until_reset(&self, now: Instant) -> Duration {
        if now < self.window_start {
            return self.window_start - now;
        }
        (self.window_start + self.window_duration).saturating_duration_since(now)
    }
}

/// Fixed-window rate limiter shared by every request of one client.
///
/// All state lives behind a single mutex so that check-and-increment in
/// [`RateLimiter::acquire`] is atomic on a multi-threaded runtime.
pub struct RateLimiter {
    name: String,
    state: Mutex<RateLimitState>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RateLimitState::new(&config, Instant::now())),
        }
    }

    /// Get rate limiter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the current window state
    pub fn state(&self) -> RateLimitState {
        let mut state = self.state.lock();
        state.roll(Instant::now());
        *state
    }

    /// Requests left in the current window
    pub fn remaining(&self) -> u32 {
        let state = self.state();
        state.limit.saturating_sub(state.request_count)
    }

    /// Check if a request may be sent right now (non-blocking, no side effects
    /// beyond rolling an elapsed window).
    pub fn can_proceed(&self) -> bool {
        self.state.lock().can_proceed(Instant::now())
    }

    /// Count one request that was actually sent
    pub fn record_request(&self) {
        let mut state = self.state.lock();
        state.roll(Instant::now());
        state.request_count = state.request_count.saturating_add(1);
    }

    /// Time until the current window ends (or, for a deferred window, starts)
    pub fn time_until_window_reset(&self) -> Duration {
        self.state.lock().time_until_reset(Instant::now())
    }

    /// Wait until [`RateLimiter::can_proceed`] would return true.
    ///
    /// Only suspends the calling task; other tasks keep running.
    pub async fn await_availability(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if state.can_proceed(now) {
                    return;
                }
                state.time_until_reset(now)
            };
            self.sleep_for(wait).await;
        }
    }

    /// Wait for availability and record the request in one atomic step.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                if state.can_proceed(now) {
                    state.request_count += 1;
                    debug!(
                        limiter = %self.name,
                        count = state.request_count,
                        limit = state.limit,
                        "Rate limit permit acquired"
                    );
                    return;
                }
                state.time_until_reset(now)
            };
            self.sleep_for(wait).await;
        }
    }

    /// Record a request if the window allows it, without waiting
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.can_proceed(Instant::now()) {
            state.request_count += 1;
            true
        } else {
            false
        }
    }

    /// Replace local tracking with values reported by the server.
    ///
    /// A retry-after value means the caller was already throttled: the next
    /// window is moved to `now + retry_after` and the count cleared. This is
    /// a one-shot correction.
    pub fn apply_server_headers(&self, headers: &RateLimitHeaders) {
        if headers.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(limit) = headers.limit {
            state.limit = limit.max(1);
        }
        if let Some(period) = headers.period {
            state.window_duration = period;
        }
        if let Some(count) = headers.count {
            state.request_count = count;
        }
        if let Some(retry_after) = headers.retry_after {
            state.window_start = now + retry_after;
            state.request_count = 0;
            warn!(
                limiter = %self.name,
                retry_after_ms = retry_after.as_millis() as u64,
                "Server throttled request, deferring next window"
            );
        }

        debug!(
            limiter = %self.name,
            limit = state.limit,
            count = state.request_count,
            window_ms = state.window_duration.as_millis() as u64,
            "Applied server rate limit headers"
        );
    }

    /// Treat the current window as exhausted.
    ///
    /// Used when the server throttles without saying for how long, so the
    /// next [`RateLimiter::acquire`] waits for the window to end.
    pub fn saturate(&self) {
        let mut state = self.state.lock();
        state.roll(Instant::now());
        state.request_count = state.request_count.max(state.limit);
    }

    async fn sleep_for(&self, wait: Duration) {
        let wait = wait.max(Duration::from_millis(1));
        debug!(
            limiter = %self.name,
            wait_ms = wait.as_millis() as u64,
            "Rate limited, waiting"
        );
        tokio::time::sleep(wait).await;
    }
}
