//! Proration-aware dual-window rate limiter
//!
//! Every permitted network call goes through [`RateLimiter::wait_if_needed`].
//! The call blocks until the request fits under the sliding hourly cap and
//! the minute cap, then keeps `60 / max_per_minute` seconds between requests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::quota::{QuotaLimits, QuotaState, QuotaStatus, QuotaTracker, WindowReset};
use crate::retry::sleep_interruptible;

/// Default interval (in permitted requests) between status log lines
pub const DEFAULT_STATUS_EVERY: u32 = 50;

/// Blocking rate limiter, safe to share between threads.
///
/// The internal lock is held across sleeps, so concurrent callers are
/// admitted one at a time in lock order.
pub struct RateLimiter {
    limits: QuotaLimits,
    min_delay: Duration,
    tracker: Mutex<QuotaTracker>,
    clock: Arc<dyn Clock>,
    status_every: u32,
    /// Permits granted by this instance
    permitted: AtomicU64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limits", &self.limits)
            .field("min_delay", &self.min_delay)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Limiter without persistence
    pub fn new(limits: QuotaLimits, clock: Arc<dyn Clock>) -> Self {
        Self::with_tracker(limits, QuotaTracker::in_memory(), clock)
    }

    /// Limiter whose counters survive restarts through the JSON file at `path`.
    pub fn persistent(
        limits: QuotaLimits,
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tracker = QuotaTracker::load(path, &limits, clock.now());
        Self::with_tracker(limits, tracker, clock)
    }

    fn with_tracker(limits: QuotaLimits, tracker: QuotaTracker, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            min_delay: limits.min_delay(),
            tracker: Mutex::new(tracker),
            clock,
            status_every: DEFAULT_STATUS_EVERY,
            permitted: AtomicU64::new(0),
        }
    }

    /// Log a status line every `n` requests (0 disables)
    pub fn with_status_every(mut self, n: u32) -> Self {
        self.status_every = n;
        self
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Block until one more request is allowed, then account for it.
    pub fn wait_if_needed(&self) -> QuotaStatus {
        match self.acquire(None) {
            Some(status) => status,
            None => self.status(),
        }
    }

    /// Like [`wait_if_needed`](Self::wait_if_needed), but gives up when
    /// `shutdown` is raised during an hour-cap or minute-cap wait. The short
    /// proration gap is always slept in full. `None` means no permit was taken.
    pub fn wait_if_needed_until(&self, shutdown: &AtomicBool) -> Option<QuotaStatus> {
        self.acquire(Some(shutdown))
    }

    fn acquire(&self, shutdown: Option<&AtomicBool>) -> Option<QuotaStatus> {
        let mut tracker = self.lock();
        let mut delay = Duration::ZERO;
        let mut now = self.clock.now();

        self.roll(&mut tracker.state, now);

        if tracker.state.hour_at_cap(&self.limits) {
            let wait = tracker.state.until_hour_reset(now);
            log::warn!(
                "Hourly limit reached ({} requests), waiting {:.0}s for the oldest to expire",
                self.limits.max_per_hour,
                wait.as_secs_f64()
            );
            if !self.pause(wait, shutdown) {
                log::info!("Shutdown requested while waiting for hourly quota");
                return None;
            }
            delay += wait;
            now = self.clock.now();
            tracker.state.release_hour_slot(&self.limits, now);
            self.roll(&mut tracker.state, now);
            tracker.persist();
        }

        if tracker.state.minute_at_cap(&self.limits) {
            let wait = tracker.state.until_minute_reset(now);
            log::info!(
                "Minute limit reached ({} requests), waiting {:.1}s",
                self.limits.max_per_minute,
                wait.as_secs_f64()
            );
            if !self.pause(wait, shutdown) {
                return None;
            }
            delay += wait;
            now = self.clock.now();
            tracker.state.reset_minute(now);
            tracker.persist();
        }

        let spacing = tracker.state.proration_delay(now, self.min_delay);
        if !spacing.is_zero() {
            // At most `min_delay`; slept in full so an in-flight record can finish
            log::debug!("Prorating: sleeping {:.2}s", spacing.as_secs_f64());
            self.clock.sleep(spacing);
            delay += spacing;
            now = self.clock.now();
            self.roll(&mut tracker.state, now);
        }

        tracker.state.record_request(now);
        tracker.persist();
        self.permitted.fetch_add(1, Ordering::Relaxed);

        let status = tracker.state.status(&self.limits, now, delay);
        if self.status_every > 0 && status.made_this_hour % self.status_every == 0 {
            log::info!(
                "Rate limit: {}/{} this hour, {}/{} this minute",
                status.made_this_hour,
                self.limits.max_per_hour,
                status.made_this_minute,
                self.limits.max_per_minute
            );
        }
        Some(status)
    }

    /// Sleep for `wait`; false when cut short by `shutdown`.
    fn pause(&self, wait: Duration, shutdown: Option<&AtomicBool>) -> bool {
        match shutdown {
            Some(flag) => sleep_interruptible(self.clock.as_ref(), wait, flag),
            None => {
                self.clock.sleep(wait);
                true
            }
        }
    }

    /// Current quota snapshot without consuming a permit.
    pub fn status(&self) -> QuotaStatus {
        let tracker = self.lock();
        let now = self.clock.now();
        let mut view = tracker.state.clone();
        view.expire_windows(now);
        view.status(&self.limits, now, Duration::ZERO)
    }

    /// True when a request issued now would not block.
    pub fn can_make_request(&self) -> bool {
        let tracker = self.lock();
        let now = self.clock.now();
        let mut view = tracker.state.clone();
        view.expire_windows(now);
        !view.hour_at_cap(&self.limits)
            && !view.minute_at_cap(&self.limits)
            && view.proration_delay(now, self.min_delay).is_zero()
    }

    /// Clear both windows and persist.
    pub fn reset(&self) {
        let mut tracker = self.lock();
        tracker.state = QuotaState::default();
        tracker.persist();
        log::info!("Rate limit counters reset");
    }

    /// Requests granted since this limiter was constructed
    pub fn permitted(&self) -> u64 {
        self.permitted.load(Ordering::Relaxed)
    }

    /// Copy of the raw counters
    pub fn state(&self) -> QuotaState {
        self.lock().state.clone()
    }

    fn roll(&self, state: &mut QuotaState, now: chrono::DateTime<chrono::Utc>) {
        match state.roll_windows(now) {
            WindowReset::Hour => log::info!("Hour window drained - resetting counters"),
            WindowReset::Minute => log::debug!("New minute window"),
            WindowReset::Opened | WindowReset::None => {}
        }
    }

    fn lock(&self) -> MutexGuard<'_, QuotaTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{elapsed_between, ManualClock};
    use chrono::{DateTime, Utc};

    fn limiter(per_minute: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = RateLimiter::new(QuotaLimits::per_minute(per_minute), clock.clone());
        (limiter, clock)
    }

    fn run_calls(limiter: &RateLimiter, clock: &ManualClock, n: usize) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|_| {
                limiter.wait_if_needed();
                clock.now()
            })
            .collect()
    }

    fn max_in_window(times: &[DateTime<Utc>], window: Duration) -> usize {
        times
            .iter()
            .map(|&start| {
                times
                    .iter()
                    .filter(|&&t| t >= start && elapsed_between(start, t) < window)
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn first_request_is_immediate() {
        let (limiter, clock) = limiter(13);
        let status = limiter.wait_if_needed();
        assert_eq!(status.delay_applied, Duration::ZERO);
        assert_eq!(status.made_this_hour, 1);
        assert_eq!(status.remaining_this_minute, 12);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn requests_are_spaced_evenly() {
        let (limiter, clock) = limiter(3);
        let times = run_calls(&limiter, &clock, 3);
        assert_eq!(elapsed_between(times[0], times[1]), Duration::from_secs(20));
        assert_eq!(elapsed_between(times[1], times[2]), Duration::from_secs(20));
    }

    #[test]
    fn three_per_minute_eight_calls() {
        let (limiter, clock) = limiter(3);
        let start = clock.now();
        let times = run_calls(&limiter, &clock, 8);

        let total = elapsed_between(start, *times.last().unwrap());
        assert!(total >= Duration::from_secs(100), "took only {total:?}");
        assert!(max_in_window(&times, Duration::from_secs(60)) <= 3);
        for pair in times.windows(2) {
            assert!(elapsed_between(pair[0], pair[1]) >= Duration::from_secs(20));
        }
    }

    #[test]
    fn idle_caller_is_not_delayed() {
        let (limiter, clock) = limiter(3);
        limiter.wait_if_needed();
        clock.advance(Duration::from_secs(45));
        let status = limiter.wait_if_needed();
        assert_eq!(status.delay_applied, Duration::ZERO);
    }

    #[test]
    fn minute_window_resets_after_idle() {
        let (limiter, clock) = limiter(3);
        run_calls(&limiter, &clock, 3);
        clock.advance(Duration::from_secs(61));
        let status = limiter.wait_if_needed();
        assert_eq!(status.made_this_minute, 1);
        assert_eq!(status.made_this_hour, 4);
        assert_eq!(status.delay_applied, Duration::ZERO);
    }

    #[test]
    fn hour_cap_blocks_until_oldest_expires() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limits = QuotaLimits::per_minute(60).with_hourly(5);
        let limiter = RateLimiter::new(limits, clock.clone());
        let start = clock.now();

        let times = run_calls(&limiter, &clock, 6);
        assert_eq!(elapsed_between(start, times[4]), Duration::from_secs(4));
        assert_eq!(elapsed_between(start, times[5]), Duration::from_secs(3600));
        assert!(max_in_window(&times, Duration::from_secs(3600)) <= 5);

        // Permits at 1..=4s and 3600s are still inside the hour
        assert_eq!(limiter.status().made_this_hour, 5);
    }

    #[test]
    fn burst_across_hour_edge_stays_under_cap() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limits = QuotaLimits::per_minute(60).with_hourly(5);
        let limiter = RateLimiter::new(limits, clock.clone());
        let start = clock.now();

        let mut times = run_calls(&limiter, &clock, 1);
        clock.advance(Duration::from_secs(3590));
        times.extend(run_calls(&limiter, &clock, 9));

        assert!(max_in_window(&times, Duration::from_secs(3600)) <= 5);
        let offsets: Vec<u64> = times
            .iter()
            .map(|&t| elapsed_between(start, t).as_secs())
            .collect();
        assert_eq!(offsets, [0, 3590, 3591, 3592, 3593, 3600, 7190, 7191, 7192, 7193]);
    }

    #[test]
    fn raised_flag_abandons_hour_wait() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limits = QuotaLimits::per_minute(60).with_hourly(2);
        let limiter = RateLimiter::new(limits, clock.clone());
        let flag = AtomicBool::new(false);

        assert!(limiter.wait_if_needed_until(&flag).is_some());
        assert!(limiter.wait_if_needed_until(&flag).is_some());
        let slept = clock.total_slept();

        flag.store(true, Ordering::Relaxed);
        assert!(limiter.wait_if_needed_until(&flag).is_none());
        assert_eq!(clock.total_slept(), slept);
        assert_eq!(limiter.permitted(), 2);
        assert_eq!(limiter.state().requests_made_this_hour, 2);
    }

    #[test]
    fn raised_flag_still_waits_out_spacing() {
        let (limiter, clock) = limiter(3);
        let flag = AtomicBool::new(false);
        assert!(limiter.wait_if_needed_until(&flag).is_some());

        flag.store(true, Ordering::Relaxed);
        let status = limiter.wait_if_needed_until(&flag).unwrap();
        assert_eq!(status.delay_applied, Duration::from_secs(20));
        assert_eq!(clock.sleeps(), [Duration::from_secs(20)]);
        assert_eq!(limiter.permitted(), 2);
    }

    /// Raises the flag after the first slept slice.
    struct StopAfterFirstSleep {
        inner: ManualClock,
        flag: Arc<AtomicBool>,
    }

    impl Clock for StopAfterFirstSleep {
        fn now(&self) -> DateTime<Utc> {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            self.flag.store(true, Ordering::Relaxed);
        }
    }

    #[test]
    fn flag_raised_mid_wait_stops_within_a_slice() {
        let flag = Arc::new(AtomicBool::new(false));
        let clock = Arc::new(StopAfterFirstSleep {
            inner: ManualClock::at_epoch(),
            flag: Arc::clone(&flag),
        });
        let limits = QuotaLimits::per_minute(60).with_hourly(1);
        let limiter = RateLimiter::new(limits, clock.clone());
        assert!(limiter.wait_if_needed_until(&flag).is_some());

        assert!(limiter.wait_if_needed_until(&flag).is_none());
        assert_eq!(clock.inner.sleeps(), [Duration::from_secs(1)]);
        assert_eq!(limiter.permitted(), 1);
    }

    #[test]
    fn backwards_clock_wait_is_bounded() {
        let (limiter, clock) = limiter(3);
        run_calls(&limiter, &clock, 3);
        let now = clock.now();
        clock.set(now - chrono::TimeDelta::minutes(10));

        let status = limiter.wait_if_needed();
        assert!(status.delay_applied <= Duration::from_secs(60) + limiter.min_delay());
    }

    #[test]
    fn status_and_can_make_request_do_not_consume() {
        let (limiter, clock) = limiter(3);
        assert!(limiter.can_make_request());
        limiter.wait_if_needed();
        assert!(!limiter.can_make_request());

        let status = limiter.status();
        assert_eq!(status.made_this_hour, 1);
        assert_eq!(limiter.status().made_this_hour, 1);

        clock.advance(Duration::from_secs(20));
        assert!(limiter.can_make_request());
    }

    #[test]
    fn reset_clears_windows() {
        let (limiter, _clock) = limiter(3);
        limiter.wait_if_needed();
        limiter.wait_if_needed();
        limiter.reset();
        assert_eq!(limiter.state(), QuotaState::default());
        assert!(limiter.can_make_request());
    }

    #[test]
    fn persisted_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate_limit_stats.json");
        let clock = Arc::new(ManualClock::at_epoch());
        let limits = QuotaLimits::per_minute(3);

        {
            let limiter = RateLimiter::persistent(limits, &path, clock.clone());
            limiter.wait_if_needed();
            limiter.wait_if_needed();
        }
        assert!(path.exists());

        let restarted = RateLimiter::persistent(limits, &path, clock.clone());
        assert_eq!(restarted.state().requests_made_this_hour, 2);
        // Proration continues from the persisted last request
        let status = restarted.wait_if_needed();
        assert_eq!(status.delay_applied, Duration::from_secs(20));
        assert_eq!(status.made_this_minute, 3);
    }

    #[test]
    fn persist_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let clock = Arc::new(ManualClock::at_epoch());

        let limiter = RateLimiter::persistent(
            QuotaLimits::per_minute(10),
            blocker.join("quota.json"),
            clock,
        );
        let status = limiter.wait_if_needed();
        assert_eq!(status.made_this_hour, 1);
    }

    #[test]
    fn concurrent_callers_are_serialized() {
        let clock = Arc::new(ManualClock::at_epoch());
        let limiter = Arc::new(RateLimiter::new(QuotaLimits::per_minute(6), clock.clone()));
        let start = clock.now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..3 {
                        limiter.wait_if_needed();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let state = limiter.state();
        assert_eq!(limiter.permitted(), 12);
        assert_eq!(state.requests_made_this_hour, 12);
        assert!(state.requests_made_this_minute <= 6);
        // 12 requests at 10s spacing
        assert!(elapsed_between(start, clock.now()) >= Duration::from_secs(110));
    }
}
