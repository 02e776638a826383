use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::model::status::BreakKind;

#[derive(Debug, thiserror::Error)]
#[error("unknown attendance event `{0}`")]
pub struct UnknownEvent(pub String);

/// Kind of an attendance log entry. Break events embed the break slug,
/// e.g. `start_Lunch2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventType {
    ClockIn,
    ClockOut,
    StartBreak(BreakKind),
    EndBreak(BreakKind),
    StartStandby,
    EndStandby,
    ResumeWorking,
    ForceClockOut,
    StartIdle,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::ClockIn => f.write_str("clockIn"),
            EventType::ClockOut => f.write_str("clockOut"),
            EventType::StartBreak(kind) => write!(f, "start_{}", kind.slug()),
            EventType::EndBreak(kind) => write!(f, "end_{}", kind.slug()),
            EventType::StartStandby => f.write_str("start_standby"),
            EventType::EndStandby => f.write_str("end_standby"),
            EventType::ResumeWorking => f.write_str("resumeWorking"),
            EventType::ForceClockOut => f.write_str("force_clockOut"),
            EventType::StartIdle => f.write_str("start_idle"),
        }
    }
}

impl FromStr for EventType {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s {
            "clockIn" => Some(EventType::ClockIn),
            "clockOut" => Some(EventType::ClockOut),
            "start_standby" => Some(EventType::StartStandby),
            "end_standby" => Some(EventType::EndStandby),
            "resumeWorking" => Some(EventType::ResumeWorking),
            "force_clockOut" => Some(EventType::ForceClockOut),
            "start_idle" => Some(EventType::StartIdle),
            other => {
                if let Some(slug) = other.strip_prefix("start_") {
                    BreakKind::from_slug(slug).map(EventType::StartBreak)
                } else if let Some(slug) = other.strip_prefix("end_") {
                    BreakKind::from_slug(slug).map(EventType::EndBreak)
                } else {
                    None
                }
            }
        };
        parsed.ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

impl From<EventType> for String {
    fn from(event: EventType) -> Self {
        event.to_string()
    }
}

impl TryFrom<String> for EventType {
    type Error = UnknownEvent;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Who closed a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FinalizeReason {
    Manual,
    Forced,
    Auto,
}

/// Immutable summary of one closed shift. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSummary {
    pub employee_id: String,
    pub shift_date: NaiveDate,
    pub clock_in_time: DateTime<Utc>,
    pub clock_out_time: DateTime<Utc>,
    pub total_clock_time: i64,
    pub accumulated_break: i64,
    pub is_late: bool,
    pub late_minutes: i64,
    pub is_overtime: bool,
    pub overtime_minutes: i64,
    pub department: Option<String>,
    pub closed_by: FinalizeReason,
}

impl ShiftSummary {
    /// Key of the summary document; one per shift.
    pub fn key(employee_id: &str, clock_in_time: DateTime<Utc>) -> String {
        format!("{}:{}", employee_id, clock_in_time.timestamp_millis())
    }

    pub fn worked_ms(&self) -> i64 {
        self.total_clock_time - self.accumulated_break
    }
}

/// One entry of the append-only attendance log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub employee_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ShiftSummary>,
}

impl AttendanceRecord {
    pub fn new(employee_id: &str, event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            employee_id: employee_id.to_string(),
            event_type,
            timestamp,
            summary: None,
        }
    }
}
