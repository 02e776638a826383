use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::attendance::breaks::BreakAccumulator;

/// Configured break labels. The label is what employees and the admin
/// dashboard see; event slugs drop the spaces (`start_Lunch2`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter, Serialize, Deserialize,
)]
pub enum BreakKind {
    #[strum(serialize = "Lunch")]
    #[serde(rename = "Lunch")]
    Lunch,
    #[strum(serialize = "Lunch 2")]
    #[serde(rename = "Lunch 2")]
    Lunch2,
    #[strum(serialize = "BIO 1")]
    #[serde(rename = "BIO 1")]
    Bio1,
    #[strum(serialize = "BIO 2")]
    #[serde(rename = "BIO 2")]
    Bio2,
}

impl BreakKind {
    pub fn slug(&self) -> String {
        self.as_ref().replace(' ', "")
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        BreakKind::iter().find(|kind| kind.slug() == slug)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown work status `{0}`")]
pub struct UnknownStatus(pub String);

/// Where an employee stands. `ClockedOut` is never persisted: it is the
/// absence of a status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum WorkStatus {
    ClockedOut,
    Working,
    Standby,
    OnBreak(BreakKind),
    WorkingIdle,
}

impl WorkStatus {
    pub fn is_clocked_in(&self) -> bool {
        !matches!(self, WorkStatus::ClockedOut)
    }

    pub fn is_on_break(&self) -> bool {
        matches!(self, WorkStatus::OnBreak(_))
    }

    /// Statuses during which overtime keeps accruing.
    pub fn is_on_the_clock(&self) -> bool {
        matches!(self, WorkStatus::Working | WorkStatus::Standby)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkStatus::ClockedOut => f.write_str("Clocked Out"),
            WorkStatus::Working => f.write_str("Working"),
            WorkStatus::Standby => f.write_str("Standby"),
            WorkStatus::WorkingIdle => f.write_str("Working Idle"),
            WorkStatus::OnBreak(kind) => f.write_str(kind.as_ref()),
        }
    }
}

impl FromStr for WorkStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Clocked Out" => Ok(WorkStatus::ClockedOut),
            "Working" => Ok(WorkStatus::Working),
            "Standby" => Ok(WorkStatus::Standby),
            "Working Idle" => Ok(WorkStatus::WorkingIdle),
            other => BreakKind::from_str(other)
                .map(WorkStatus::OnBreak)
                .map_err(|_| UnknownStatus(other.to_string())),
        }
    }
}

impl From<WorkStatus> for String {
    fn from(status: WorkStatus) -> Self {
        status.to_string()
    }
}

impl TryFrom<String> for WorkStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lateness and overtime carried for the rest of a shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftFlags {
    #[serde(default)]
    pub is_late: bool,
    #[serde(default)]
    pub late_minutes: i64,
    #[serde(default)]
    pub is_overtime: bool,
    #[serde(default)]
    pub overtime_minutes: i64,
}

impl ShiftFlags {
    /// Overtime only ever grows within a shift. Returns whether anything
    /// changed, so callers can skip redundant writes.
    pub fn observe_overtime(&mut self, minutes: Option<i64>) -> bool {
        match minutes {
            Some(minutes) if !self.is_overtime || minutes > self.overtime_minutes => {
                self.is_overtime = true;
                self.overtime_minutes = minutes;
                true
            }
            _ => false,
        }
    }
}

/// Live document in the `status` collection, keyed by employee id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeStatus {
    pub employee_id: String,
    pub status: WorkStatus,
    pub state_start_time: DateTime<Utc>,
    pub clock_in_time: DateTime<Utc>,
    #[serde(default)]
    pub department: Option<String>,
    pub shift_date: NaiveDate,
    #[serde(flatten)]
    pub breaks: BreakAccumulator,
    #[serde(flatten)]
    pub flags: ShiftFlags,
    #[serde(default)]
    pub should_buzz: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_buzz_time: Option<DateTime<Utc>>,
}

impl EmployeeStatus {
    /// Break state as any actor should see it, including a session that was
    /// opened before the accumulator was persisted.
    pub fn recovered_breaks(&self) -> BreakAccumulator {
        let mut breaks = self.breaks.clone();
        breaks.recover(self.status, self.state_start_time);
        breaks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_labels_round_trip_through_documents() {
        for status in [
            WorkStatus::Working,
            WorkStatus::Standby,
            WorkStatus::WorkingIdle,
            WorkStatus::OnBreak(BreakKind::Lunch2),
            WorkStatus::OnBreak(BreakKind::Bio1),
        ] {
            let value = serde_json::to_value(status).unwrap();
            assert_eq!(serde_json::from_value::<WorkStatus>(value).unwrap(), status);
        }
        assert_eq!(serde_json::to_value(WorkStatus::WorkingIdle).unwrap(), json!("Working Idle"));
        assert_eq!(
            serde_json::to_value(WorkStatus::OnBreak(BreakKind::Bio2)).unwrap(),
            json!("BIO 2")
        );
    }

    #[test]
    fn free_form_statuses_are_rejected() {
        assert!("Lunch3".parse::<WorkStatus>().is_err());
        assert!(serde_json::from_value::<WorkStatus>(json!("working")).is_err());
    }

    #[test]
    fn slugs_drop_spaces() {
        assert_eq!(BreakKind::Lunch2.slug(), "Lunch2");
        assert_eq!(BreakKind::from_slug("BIO1"), Some(BreakKind::Bio1));
        assert_eq!(BreakKind::from_slug("BIO 1"), None);
    }

    #[test]
    fn overtime_is_monotonic() {
        let mut flags = ShiftFlags::default();
        assert!(!flags.observe_overtime(None));
        assert!(flags.observe_overtime(Some(31)));
        assert!(!flags.observe_overtime(Some(31)));
        assert!(!flags.observe_overtime(None));
        assert!(!flags.observe_overtime(Some(12)));
        assert!(flags.is_overtime);
        assert_eq!(flags.overtime_minutes, 31);
        assert!(flags.observe_overtime(Some(40)));
        assert_eq!(flags.overtime_minutes, 40);
    }

    #[test]
    fn status_document_layout() {
        let doc = json!({
            "employeeId": "e1",
            "status": "Lunch",
            "stateStartTime": "2024-03-04T12:00:00Z",
            "clockInTime": "2024-03-04T09:00:00Z",
            "department": "ops",
            "shiftDate": "2024-03-04",
            "breakTotalMs": 60000,
            "isLate": true,
            "lateMinutes": 20
        });
        let status: EmployeeStatus = serde_json::from_value(doc).unwrap();
        assert_eq!(status.status, WorkStatus::OnBreak(BreakKind::Lunch));
        assert_eq!(status.breaks.total_ms(), 60_000);
        assert!(status.flags.is_late);
        assert!(!status.should_buzz);

        // Mid-break without a persisted session start: recovered from stateStartTime.
        let recovered = status.recovered_breaks();
        assert_eq!(recovered.open_since(), Some(status.state_start_time));
    }
}
