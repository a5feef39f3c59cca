//! Dual-window request quota accounting
//!
//! The hourly cap is a sliding window over the permit times of the last
//! hour. The minute window is anchored at the first request after it
//! expires; proration keeps any 60 seconds under the minute cap.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use inshort_store::{DurableJson, LoadSource, Validate};
use serde::{Deserialize, Serialize};

use crate::clock::{elapsed_between, to_chrono};

pub const MINUTE: Duration = Duration::from_secs(60);
pub const HOUR: Duration = Duration::from_secs(3600);

/// Request caps. The hourly cap is an independent ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    pub max_per_minute: u32,
    pub max_per_hour: u32,
}

impl QuotaLimits {
    /// `max_per_minute` per minute and `60 × max_per_minute` per hour.
    pub fn per_minute(max_per_minute: u32) -> Self {
        let max_per_minute = max_per_minute.max(1);
        Self {
            max_per_minute,
            max_per_hour: max_per_minute.saturating_mul(60),
        }
    }

    pub fn with_hourly(self, max_per_hour: u32) -> Self {
        Self {
            max_per_hour: max_per_hour.max(1),
            ..self
        }
    }

    /// Even spacing between requests: `60 / max_per_minute` seconds.
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(60.0 / f64::from(self.max_per_minute.max(1)))
    }
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self::per_minute(13)
    }
}

/// Persisted counters for both windows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaState {
    /// Permits in the last hour; always `recent_requests.len()`
    pub requests_made_this_hour: u32,
    pub requests_made_this_minute: u32,
    /// Oldest permit still counted against the hourly cap
    pub hour_window_start: Option<DateTime<Utc>>,
    pub minute_window_start: Option<DateTime<Utc>>,
    pub last_request_at: Option<DateTime<Utc>>,
    /// Permit times of the last hour, oldest first
    pub recent_requests: VecDeque<DateTime<Utc>>,
}

impl Validate for QuotaState {}

/// Which windows were rolled over by [`QuotaState::roll_windows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowReset {
    /// Both windows still open
    None,
    /// No window existed yet; the minute window was opened
    Opened,
    /// Minute window expired and was reset
    Minute,
    /// Every counted permit aged out of the hour; both windows were reset
    Hour,
}

impl QuotaState {
    /// Open missing windows and reset expired ones.
    pub fn roll_windows(&mut self, now: DateTime<Utc>) -> WindowReset {
        if self.minute_window_start.is_none() && self.recent_requests.is_empty() {
            self.reset_minute(now);
            return WindowReset::Opened;
        }
        self.expire_windows(now)
    }

    /// Drop permits older than an hour and reset an expired minute window.
    ///
    /// A state that never saw a request stays untouched.
    pub fn expire_windows(&mut self, now: DateTime<Utc>) -> WindowReset {
        let had_permits = !self.recent_requests.is_empty();
        self.prune_hour(now);
        if had_permits && self.recent_requests.is_empty() {
            self.reset_minute(now);
            return WindowReset::Hour;
        }
        match self.minute_window_start {
            Some(start) if elapsed_between(start, now) >= MINUTE => {
                self.reset_minute(now);
                WindowReset::Minute
            }
            None if had_permits => {
                self.reset_minute(now);
                WindowReset::Minute
            }
            _ => WindowReset::None,
        }
    }

    fn prune_hour(&mut self, now: DateTime<Utc>) {
        while self
            .recent_requests
            .front()
            .is_some_and(|&t| elapsed_between(t, now) >= HOUR)
        {
            self.recent_requests.pop_front();
        }
        self.sync_hour();
    }

    fn sync_hour(&mut self) {
        self.requests_made_this_hour =
            u32::try_from(self.recent_requests.len()).unwrap_or(u32::MAX);
        self.hour_window_start = self.recent_requests.front().copied();
    }

    /// Free one hourly slot after a full wait for the oldest permit.
    ///
    /// Permits stamped in the future (clock went backwards) are dropped too,
    /// so one wait is always enough.
    pub fn release_hour_slot(&mut self, limits: &QuotaLimits, now: DateTime<Utc>) {
        self.prune_hour(now);
        while self.recent_requests.len() >= limits.max_per_hour as usize {
            self.recent_requests.pop_front();
        }
        self.sync_hour();
    }

    pub fn reset_minute(&mut self, now: DateTime<Utc>) {
        self.requests_made_this_minute = 0;
        self.minute_window_start = Some(now);
    }

    pub fn hour_at_cap(&self, limits: &QuotaLimits) -> bool {
        self.requests_made_this_hour >= limits.max_per_hour
    }

    pub fn minute_at_cap(&self, limits: &QuotaLimits) -> bool {
        self.requests_made_this_minute >= limits.max_per_minute
    }

    /// Time until the oldest counted permit leaves the hour, at most one hour.
    pub fn until_hour_reset(&self, now: DateTime<Utc>) -> Duration {
        remaining(self.recent_requests.front().copied(), HOUR, now)
    }

    /// Time left in the minute window, never more than one minute.
    pub fn until_minute_reset(&self, now: DateTime<Utc>) -> Duration {
        remaining(self.minute_window_start, MINUTE, now)
    }

    /// How much longer to wait so requests stay `min_delay` apart.
    pub fn proration_delay(&self, now: DateTime<Utc>, min_delay: Duration) -> Duration {
        match self.last_request_at {
            Some(last) => min_delay.saturating_sub(elapsed_between(last, now)),
            None => Duration::ZERO,
        }
    }

    pub fn record_request(&mut self, now: DateTime<Utc>) {
        self.recent_requests.push_back(now);
        self.sync_hour();
        self.requests_made_this_minute = self.requests_made_this_minute.saturating_add(1);
        self.last_request_at = Some(now);
    }

    /// Pull counters back under the caps (hand-edited or reconfigured state).
    ///
    /// A bare hourly counter without permit times is expanded into that many
    /// permits at `hour_window_start`.
    pub fn clamp_to(&mut self, limits: &QuotaLimits) {
        if self.recent_requests.is_empty() && self.requests_made_this_hour > 0 {
            if let Some(start) = self.hour_window_start {
                let n = self.requests_made_this_hour.min(limits.max_per_hour);
                self.recent_requests.extend((0..n).map(|_| start));
            }
        }
        while self.recent_requests.len() > limits.max_per_hour as usize {
            self.recent_requests.pop_front();
        }
        self.sync_hour();
        self.requests_made_this_minute = self
            .requests_made_this_minute
            .min(limits.max_per_minute)
            .min(self.requests_made_this_hour);
    }

    pub fn status(
        &self,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
        delay_applied: Duration,
    ) -> QuotaStatus {
        QuotaStatus {
            made_this_hour: self.requests_made_this_hour,
            remaining_this_hour: limits
                .max_per_hour
                .saturating_sub(self.requests_made_this_hour),
            made_this_minute: self.requests_made_this_minute,
            remaining_this_minute: limits
                .max_per_minute
                .saturating_sub(self.requests_made_this_minute),
            delay_applied,
            to_hour_reset: self.until_hour_reset(now),
            to_minute_reset: self.until_minute_reset(now),
        }
    }
}

fn remaining(start: Option<DateTime<Utc>>, span: Duration, now: DateTime<Utc>) -> Duration {
    match start {
        Some(start) => elapsed_between(now, start + to_chrono(span)).min(span),
        None => Duration::ZERO,
    }
}

/// Snapshot returned after every permitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub made_this_hour: u32,
    pub remaining_this_hour: u32,
    pub made_this_minute: u32,
    pub remaining_this_minute: u32,
    /// Total time the caller was blocked
    pub delay_applied: Duration,
    pub to_hour_reset: Duration,
    pub to_minute_reset: Duration,
}

/// In-memory quota state with best-effort persistence.
///
/// The in-memory copy is authoritative for the life of the process; the
/// file only carries state across restarts.
#[derive(Debug)]
pub struct QuotaTracker {
    pub state: QuotaState,
    file: Option<DurableJson<QuotaState>>,
}

impl QuotaTracker {
    pub fn in_memory() -> Self {
        Self {
            state: QuotaState::default(),
            file: None,
        }
    }

    /// Load persisted state, expiring windows that closed while we were away.
    pub fn load(path: impl Into<PathBuf>, limits: &QuotaLimits, now: DateTime<Utc>) -> Self {
        let file = DurableJson::<QuotaState>::new(path);
        file.cleanup_stale_tmp();
        let loaded = file.load();
        let mut state = loaded.value;
        state.clamp_to(limits);
        match state.expire_windows(now) {
            WindowReset::Hour => {
                log::info!("Hour window drained while stopped - resetting counters")
            }
            WindowReset::Minute => log::debug!("Minute boundary crossed while stopped"),
            WindowReset::None | WindowReset::Opened => {}
        }
        if loaded.source != LoadSource::Default {
            log::debug!(
                "Quota state: {}/{} this hour, {}/{} this minute",
                state.requests_made_this_hour,
                limits.max_per_hour,
                state.requests_made_this_minute,
                limits.max_per_minute
            );
        }
        Self {
            state,
            file: Some(file),
        }
    }

    /// Write state to disk; failures are logged and swallowed.
    pub fn persist(&self) {
        if let Some(file) = &self.file {
            if let Err(e) = file.save(&self.state) {
                log::warn!("Cannot persist quota state: {e}");
            }
        }
    }
}
