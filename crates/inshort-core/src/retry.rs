//! Fixed-delay retry policy and interruptible sleeps

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::clock::Clock;

/// Longest single slice of an interruptible sleep
const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Fixed backoff with an optional attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    /// `None` retries until interrupted
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub const fn fixed(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Whether failure number `attempt` (1-based) may be retried
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// `"3/5"` or `"3"` for log lines
    pub fn label(&self, attempt: u32) -> String {
        match self.max_attempts {
            Some(max) => format!("{attempt}/{max}"),
            None => attempt.to_string(),
        }
    }
}

/// Sleep for `duration` in short slices, stopping early once `shutdown` is set.
///
/// Returns false if the sleep was cut short.
pub fn sleep_interruptible(clock: &dyn Clock, duration: Duration, shutdown: &AtomicBool) -> bool {
    let mut left = duration;
    while !left.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let slice = left.min(SLEEP_SLICE);
        clock.sleep(slice);
        left -= slice;
    }
    !shutdown.load(Ordering::Relaxed)
}
