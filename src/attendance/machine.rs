//! Attendance transition table.
//!
//! Pure: given the current status, the requested action and whether "now"
//! falls inside the department window, say where the employee ends up and
//! which event gets logged. `None` means the action is not legal from here,
//! which callers treat as a no-op.

use crate::model::attendance::EventType;
use crate::model::status::{BreakKind, WorkStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ClockIn,
    ToggleBreak(BreakKind),
    ToggleStandby,
    ResumeWorking,
    ClockOut,
    ForceClockOut,
    /// Administrative idle flag.
    MarkIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: WorkStatus,
    pub to: WorkStatus,
    pub event: EventType,
}

fn scheduled(within_schedule: bool) -> WorkStatus {
    if within_schedule {
        WorkStatus::Working
    } else {
        WorkStatus::Standby
    }
}

pub fn next(from: WorkStatus, action: Action, within_schedule: bool) -> Option<Transition> {
    use WorkStatus::*;

    let (to, event) = match (from, action) {
        (ClockedOut, Action::ClockIn) => (scheduled(within_schedule), EventType::ClockIn),

        (Working, Action::ToggleBreak(kind)) => (OnBreak(kind), EventType::StartBreak(kind)),
        (OnBreak(current), Action::ToggleBreak(kind)) if current == kind => {
            (scheduled(within_schedule), EventType::EndBreak(kind))
        }

        (Working, Action::ToggleStandby) => (Standby, EventType::StartStandby),
        (Standby, Action::ToggleStandby) if within_schedule => (Working, EventType::EndStandby),

        (WorkingIdle, Action::ResumeWorking) => (scheduled(within_schedule), EventType::ResumeWorking),

        (Working | Standby, Action::MarkIdle) => (WorkingIdle, EventType::StartIdle),

        (from, Action::ClockOut) if from.is_clocked_in() => (ClockedOut, EventType::ClockOut),
        (from, Action::ForceClockOut) if from.is_clocked_in() => (ClockedOut, EventType::ForceClockOut),

        _ => return None,
    };

    Some(Transition { from, to, event })
}

/// The continuous guard: which toggle, if any, brings the status back in
/// line with the schedule.
pub fn schedule_correction(status: WorkStatus, within_schedule: bool) -> Option<Action> {
    match (status, within_schedule) {
        (WorkStatus::Working, false) | (WorkStatus::Standby, true) => Some(Action::ToggleStandby),
        _ => None,
    }
}
