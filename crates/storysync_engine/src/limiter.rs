//! Token-bucket admission control for outbound tracker calls.
//!
//! One limiter instance is owned by the tracker connection and shared
//! by every worker making calls through it; per-worker instances
//! would void the admission guarantee. The limiter also adapts to
//! server feedback: an explicit `Retry-After` forces a hard wait
//! until that absolute time regardless of token count, and a 429
//! without one halves the refill rate to absorb throttling that
//! token accounting alone did not anticipate.

use crate::cancel::CancelToken;
use crate::config::RateLimitConfig;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Floor for the adaptive refill rate, in tokens per second.
const MIN_REFILL_RATE: f64 = 0.1;

/// Upper bound on a single wait slice inside `acquire`.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A token was consumed; the call may proceed.
    Admitted,
    /// The optional timeout elapsed before a token was available.
    TimedOut,
    /// The sync was cancelled while waiting.
    Cancelled,
}

#[derive(Debug)]
struct LimiterState {
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
    hard_wait_until: Option<Instant>,
}

impl LimiterState {
    fn refill(&mut self, burst_capacity: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(burst_capacity);
        self.last_refill = now;

        if let Some(deadline) = self.hard_wait_until {
            if now >= deadline {
                self.hard_wait_until = None;
            }
        }
    }
}

/// Token bucket with continuous refill and adaptive backoff.
///
/// All mutable state sits behind a single mutex so concurrent
/// callers serialize their token accounting.
#[derive(Debug)]
pub struct RateLimiter {
    burst_capacity: f64,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            burst_capacity: config.burst_capacity,
            state: Mutex::new(LimiterState {
                tokens: config.burst_capacity,
                refill_rate: config.refill_rate,
                last_refill: Instant::now(),
                hard_wait_until: None,
            }),
        }
    }

    /// Acquires one token, blocking while the bucket is empty or a
    /// hard wait is active.
    ///
    /// With `timeout` set, gives up once the deadline passes;
    /// otherwise blocks until admitted or cancelled.
    pub fn acquire(&self, timeout: Option<Duration>, cancel: &CancelToken) -> AcquireOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if cancel.is_cancelled() {
                return AcquireOutcome::Cancelled;
            }

            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                state.refill(self.burst_capacity, now);

                if let Some(hard_deadline) = state.hard_wait_until {
                    hard_deadline.duration_since(now)
                } else if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return AcquireOutcome::Admitted;
                } else {
                    Duration::from_secs_f64((1.0 - state.tokens) / state.refill_rate)
                }
            };

            if let Some(deadline) = deadline {
                if Instant::now() + wait > deadline {
                    // The token cannot arrive in time; wait out the
                    // remainder so the reported timing is honest,
                    // then give up.
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if !cancel.sleep(remaining.min(WAIT_SLICE)) {
                        return AcquireOutcome::Cancelled;
                    }
                    if Instant::now() >= deadline {
                        return AcquireOutcome::TimedOut;
                    }
                    continue;
                }
            }

            if !cancel.sleep(wait.min(WAIT_SLICE)) {
                return AcquireOutcome::Cancelled;
            }
        }
    }

    /// Feeds an observed response back into the limiter.
    ///
    /// An explicit retry-after enters hard-wait mode until that
    /// absolute time; a 429 without one halves the refill rate,
    /// floored at 0.1 tokens per second.
    pub fn on_response_observed(&self, status: u16, retry_after: Option<Duration>) {
        let mut state = self.state.lock();
        if let Some(after) = retry_after {
            let deadline = Instant::now() + after;
            state.hard_wait_until = Some(match state.hard_wait_until {
                Some(existing) => existing.max(deadline),
                None => deadline,
            });
            debug!(retry_after_ms = after.as_millis() as u64, "limiter entering hard wait");
        } else if status == 429 {
            state.refill_rate = (state.refill_rate / 2.0).max(MIN_REFILL_RATE);
            debug!(refill_rate = state.refill_rate, "limiter halved refill rate after 429");
        }
    }

    /// Tokens currently available, after refill. Diagnostic only.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(self.burst_capacity, Instant::now());
        state.tokens
    }

    /// Current refill rate in tokens per second. Diagnostic only.
    pub fn current_refill_rate(&self) -> f64 {
        self.state.lock().refill_rate
    }
}
