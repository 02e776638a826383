use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::model::status::WorkStatus;

/// Cumulative break time of one shift.
///
/// Lives inside the employee's status document (`breakTotalMs`,
/// `breakOpenSince`) so the employee's session, the admin dashboard and the
/// sweeper all finalize from the same numbers. At most one session is open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakAccumulator {
    #[serde(default)]
    break_total_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    break_open_since: Option<DateTime<Utc>>,
}

impl BreakAccumulator {
    /// Opens a session. Returns `false` if one is already open.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.break_open_since.is_some() {
            return false;
        }
        self.break_open_since = Some(now);
        true
    }

    /// Closes the open session and adds it to the total. A session that
    /// appears to end before it started (clock correction) counts as zero.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.break_open_since.take()?;
        let elapsed = (now - started).max(Duration::zero());
        self.break_total_ms += elapsed.num_milliseconds();
        Some(elapsed)
    }

    /// Closed sessions only.
    pub fn total(&self) -> Duration {
        Duration::milliseconds(self.break_total_ms)
    }

    pub fn total_ms(&self) -> i64 {
        self.break_total_ms
    }

    pub fn open_since(&self) -> Option<DateTime<Utc>> {
        self.break_open_since
    }

    /// Length of the open session so far.
    pub fn elapsed_open(&self, now: DateTime<Utc>) -> Duration {
        self.break_open_since
            .map(|started| (now - started).max(Duration::zero()))
            .unwrap_or_else(Duration::zero)
    }

    /// Total including the open session, without closing it.
    pub fn total_at(&self, now: DateTime<Utc>) -> Duration {
        self.total() + self.elapsed_open(now)
    }

    /// Closes any open session. Used before a shift is summarized.
    pub fn flush(&mut self, now: DateTime<Utc>) {
        self.stop(now);
    }

    /// An employee found mid-break whose session start was never persisted
    /// resumes from the moment the break status began.
    pub fn recover(&mut self, status: WorkStatus, state_start_time: DateTime<Utc>) {
        if status.is_on_break() && self.break_open_since.is_none() {
            self.break_open_since = Some(state_start_time);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
