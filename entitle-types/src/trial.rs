//! Trial countdown.
//!
//! The remaining days are always derived from the start instant and the
//! current wall-clock time. Nothing here is a stored counter, so the value is
//! correct across restarts and while the process was suspended.

use crate::LicenseState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default trial length in days.
pub const TRIAL_PERIOD_DAYS: u32 = 7;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Start instant and length of the local trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialClock {
    started_at: DateTime<Utc>,
    period_days: u32,
}

impl TrialClock {
    /// Creates a clock with the default seven-day period.
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self::with_period(started_at, TRIAL_PERIOD_DAYS)
    }

    /// Creates a clock with a custom period.
    #[must_use]
    pub fn with_period(started_at: DateTime<Utc>, period_days: u32) -> Self {
        Self {
            started_at,
            period_days,
        }
    }

    /// When the trial started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Trial length in days.
    #[must_use]
    pub fn period_days(&self) -> u32 {
        self.period_days
    }

    /// Whole days elapsed since the start. A wall clock set before the start
    /// counts as zero elapsed days.
    #[must_use]
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> u64 {
        let secs = (now - self.started_at).num_seconds();
        if secs <= 0 {
            0
        } else {
            (secs / SECS_PER_DAY) as u64
        }
    }

    /// `max(0, period_days - elapsed_days)`.
    #[must_use]
    pub fn days_remaining(&self, now: DateTime<Utc>) -> u32 {
        let elapsed = self.elapsed_days(now);
        u64::from(self.period_days).saturating_sub(elapsed) as u32
    }

    /// Returns true once no trial days remain.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.days_remaining(now) == 0
    }

    /// The trial state this clock resolves to at `now`.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> LicenseState {
        match self.days_remaining(now) {
            0 => LicenseState::TrialExpired,
            days_remaining => LicenseState::TrialActive { days_remaining },
        }
    }
}
