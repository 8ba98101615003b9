//! Cooperative cancellation for in-flight syncs.
//!
//! A `CancelToken` is cloned into every blocking site: limiter
//! admission, backoff sleeps, and the execution scheduler. Sleeps are
//! sliced so a cancel is observed within tens of milliseconds rather
//! than after a full backoff interval. Operations already dispatched
//! to the remote system are not rolled back on cancel; the backup
//! manager exists to compensate.

use crate::error::{EngineResult, TrackerError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on a single uninterruptible sleep slice.
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears the flag so the owner can start a new sync.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Errors with `TrackerError::Cancelled` once cancellation was
    /// requested.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(TrackerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, waking early on cancel.
    ///
    /// Returns true if the full duration elapsed, false if the sleep
    /// was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn cancel_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(TrackerError::Cancelled));

        token.reset();
        assert!(!clone.is_cancelled());
    }

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn sleep_wakes_early_on_cancel() {
        let token = CancelToken::new();
        let clone = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            clone.cancel();
        });

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        handle.join().unwrap();
    }
}
