//! Rate Limiting
//!
//! Process-wide fixed-window admission control with a minimum spacing delay.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use tiered_prompt_orchestrator::enhanced::RateLimiter;
//! use tiered_prompt_orchestrator::EventBus;
//! # #[tokio::main]
//! # async fn main() {
//! // 100 requests per 60 seconds, 100 ms spacing after each admission
//! let limiter = RateLimiter::new(
//!     100,
//!     Duration::from_secs(60),
//!     Duration::from_millis(100),
//!     EventBus::new(),
//! );
//!
//! match limiter.admit().await {
//!     Ok(()) => { /* process request */ }
//!     Err(e) => eprintln!("{e}"),
//! }
//! # }
//! ```
//!
//! The window rolls forward either lazily, on the first call after it has
//! elapsed, or from the background timer via
//! [`reset_if_elapsed`](RateLimiter::reset_if_elapsed). Both paths check the
//! elapsed time under the same lock, so a window is never reset twice.
//!
//! The capacity bound applies per fixed window, not per rolling window
//! length: a burst at the end of one window followed by a burst at the start
//! of the next can admit up to twice `max_requests` within a short span.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::{EventBus, EventKind};
use crate::OrchestratorError;

/// Global rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    window: Mutex<RateWindow>,
    max_requests: u32,
    window_len: Duration,
    min_spacing: Duration,
    events: EventBus,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started_at: Instant,
}

impl RateWindow {
    /// Roll the window if it has elapsed; returns the closed window's count.
    fn roll_if_elapsed(&mut self, now: Instant, window_len: Duration) -> Option<u32> {
        if now.duration_since(self.started_at) < window_len {
            return None;
        }
        let previous = self.count;
        self.count = 0;
        self.started_at = now;
        Some(previous)
    }
}

impl RateLimiter {
    /// Create a rate limiter
    ///
    /// - `max_requests`: admissions allowed per window
    /// - `window`: window length
    /// - `min_spacing`: delay applied after every admission
    pub fn new(max_requests: u32, window: Duration, min_spacing: Duration, events: EventBus) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                window: Mutex::new(RateWindow {
                    count: 0,
                    started_at: Instant::now(),
                }),
                max_requests,
                window_len: window,
                min_spacing,
                events,
            }),
        }
    }

    /// Admit one request, then wait out the minimum spacing.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::RateLimited`] when the current window is
    /// full. A rejection neither consumes capacity nor resets the window.
    pub async fn admit(&self) -> Result<(), OrchestratorError> {
        self.try_admit()?;
        if !self.inner.min_spacing.is_zero() {
            tokio::time::sleep(self.inner.min_spacing).await;
        }
        Ok(())
    }

    /// Admission check without the spacing delay.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::RateLimited`] when the current window is full.
    pub fn try_admit(&self) -> Result<(), OrchestratorError> {
        let now = Instant::now();
        let (admitted, count, rolled) = {
            let mut window = self.inner.window.lock();
            let rolled = window.roll_if_elapsed(now, self.inner.window_len);
            if window.count >= self.inner.max_requests {
                (false, window.count, rolled)
            } else {
                window.count += 1;
                (true, window.count, rolled)
            }
        };

        if let Some(previous) = rolled {
            self.emit_reset(previous, "lazy");
        }

        if !admitted {
            warn!(count = count, limit = self.inner.max_requests, "rate limit exceeded");
            return Err(OrchestratorError::RateLimited);
        }

        debug!(count = count, limit = self.inner.max_requests, "rate limit check passed");
        Ok(())
    }

    /// Timer path: roll the window if it has elapsed.
    ///
    /// Returns `true` if this call rolled the window. Idempotent within a
    /// window: a second call (or a lazy roll that got there first) is a no-op.
    pub fn reset_if_elapsed(&self) -> bool {
        let rolled = self
            .inner
            .window
            .lock()
            .roll_if_elapsed(Instant::now(), self.inner.window_len);

        match rolled {
            Some(previous) => {
                self.emit_reset(previous, "timer");
                true
            }
            None => false,
        }
    }

    /// Length of one admission window.
    pub fn window(&self) -> Duration {
        self.inner.window_len
    }

    /// Get current window usage
    pub fn usage(&self) -> RateLimitInfo {
        let window = *self.inner.window.lock();
        let elapsed = Instant::now().duration_since(window.started_at);
        RateLimitInfo {
            used: window.count,
            remaining: self.inner.max_requests.saturating_sub(window.count),
            reset_in_secs: self.inner.window_len.saturating_sub(elapsed).as_secs(),
        }
    }

    fn emit_reset(&self, previous_count: u32, trigger: &'static str) {
        debug!(previous_count = previous_count, trigger = trigger, "rate limit window reset");
        self.inner.events.emit(
            EventKind::RateLimitReset,
            json!({ "previousCount": previous_count, "trigger": trigger }),
        );
    }
}

/// Rate limit information for the current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Number of requests admitted in the current window.
    pub used: u32,
    /// Number of admissions still available in the current window.
    pub remaining: u32,
    /// Seconds until the current window elapses.
    pub reset_in_secs: u64,
}
