use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::attendance::breaks::BreakAccumulator;
use crate::attendance::clock::TimeSource;
use crate::attendance::directory::Directory;
use crate::attendance::error::{AttendanceError, AttendanceResult};
use crate::attendance::finalizer::ShiftFinalizer;
use crate::attendance::machine::{self, Action, Transition};
use crate::attendance::schedule;
use crate::attendance::ticker::ShiftSnapshot;
use crate::model::attendance::{AttendanceRecord, EventType, FinalizeReason, ShiftSummary};
use crate::model::employee::Employee;
use crate::model::status::{BreakKind, EmployeeStatus, ShiftFlags, WorkStatus};
use crate::store::{self, Collection, Filter, Store, StoreError};

/// Every attendance transition, whoever asks for it.
///
/// Operations re-read the status document before deciding anything and write
/// only the fields they own. A guard violation is not an error: the call
/// returns `Ok(None)` / `Ok(false)` and nothing is written.
#[derive(Clone)]
pub struct AttendanceService {
    store: Arc<dyn Store>,
    time: Arc<TimeSource>,
    directory: Directory,
    finalizer: ShiftFinalizer,
    max_offset_age: Duration,
}

impl AttendanceService {
    pub fn new(store: Arc<dyn Store>, time: Arc<TimeSource>, directory: Directory, max_offset_age: Duration) -> Self {
        let finalizer = ShiftFinalizer::new(store.clone(), time.clone(), directory.clone());
        Self {
            store,
            time,
            directory,
            finalizer,
            max_offset_age,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn time(&self) -> &Arc<TimeSource> {
        &self.time
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Current status document, `None` when clocked out.
    pub async fn status(&self, employee_id: &str) -> AttendanceResult<Option<EmployeeStatus>> {
        Ok(store::get_as(self.store.as_ref(), Collection::Status, employee_id).await?)
    }

    pub async fn snapshot(&self, employee_id: &str) -> AttendanceResult<ShiftSnapshot> {
        let status = self.status(employee_id).await?;
        Ok(ShiftSnapshot::at(status.as_ref(), self.time.now()))
    }

    async fn active_employee(&self, employee_id: &str) -> AttendanceResult<Employee> {
        let employee = self
            .directory
            .employee(employee_id)
            .await?
            .ok_or_else(|| AttendanceError::UnknownEmployee(employee_id.to_string()))?;
        if employee.disabled {
            return Err(AttendanceError::Disabled(employee_id.to_string()));
        }
        Ok(employee)
    }

    async fn record(&self, employee_id: &str, event: EventType, at: DateTime<Utc>) -> AttendanceResult<()> {
        let record = AttendanceRecord::new(employee_id, event, at);
        self.store
            .create(Collection::Attendance, store::to_document(&record)?)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(operation = "clock_in"))]
    pub async fn clock_in(&self, employee_id: &str) -> AttendanceResult<Option<EmployeeStatus>> {
        let employee = self.active_employee(employee_id).await?;
        self.time.resync_if_stale(self.max_offset_age).await;

        if self.status(employee_id).await?.is_some() {
            debug!("Already clocked in");
            return Ok(None);
        }

        let now = self.time.now();
        let department = self.directory.department(employee.department.as_deref()).await;
        let within = schedule::is_within_schedule(now, department.as_ref());
        let Some(transition) = machine::next(WorkStatus::ClockedOut, Action::ClockIn, within) else {
            return Ok(None);
        };
        let lateness = schedule::lateness(now, department.as_ref());

        let status = EmployeeStatus {
            employee_id: employee_id.to_string(),
            status: transition.to,
            state_start_time: now,
            clock_in_time: now,
            department: employee.department.clone(),
            shift_date: schedule::local_day(now, department.as_ref()),
            breaks: Default::default(),
            flags: ShiftFlags {
                is_late: lateness.is_late,
                late_minutes: lateness.late_minutes,
                ..Default::default()
            },
            should_buzz: false,
            last_buzz_time: None,
        };

        // The status document is the claim on the shift.
        let claimed = self
            .store
            .create_if_absent(Collection::Status, employee_id, store::to_document(&status)?)
            .await?;
        if !claimed {
            debug!("Lost clock-in race, shift already open");
            return Ok(None);
        }
        self.record(employee_id, transition.event, now).await?;

        info!(
            status = %status.status,
            is_late = lateness.is_late,
            late_minutes = lateness.late_minutes,
            "Clocked in"
        );
        Ok(Some(status))
    }

    #[instrument(skip(self), fields(operation = "clock_out"))]
    pub async fn clock_out(&self, employee_id: &str) -> AttendanceResult<Option<ShiftSummary>> {
        self.time.resync_if_stale(self.max_offset_age).await;
        self.finalizer.finalize(employee_id, FinalizeReason::Manual).await
    }

    /// Admin close with a summary.
    #[instrument(skip(self), fields(operation = "close_shift"))]
    pub async fn close_shift(&self, employee_id: &str) -> AttendanceResult<Option<ShiftSummary>> {
        self.finalizer.finalize(employee_id, FinalizeReason::Forced).await
    }

    /// Sweeper close at the end of the department day.
    pub async fn auto_clock_out(&self, employee_id: &str) -> AttendanceResult<Option<ShiftSummary>> {
        self.finalizer.finalize(employee_id, FinalizeReason::Auto).await
    }

    /// Admin clock-out without a summary.
    #[instrument(skip(self), fields(operation = "force_clock_out"))]
    pub async fn force_clock_out(&self, employee_id: &str) -> AttendanceResult<bool> {
        let Some(status) = self.status(employee_id).await? else {
            return Ok(false);
        };
        let Some(transition) = machine::next(status.status, Action::ForceClockOut, true) else {
            return Ok(false);
        };
        let now = self.time.now();
        self.record(employee_id, transition.event, now).await?;
        self.store.delete(Collection::Status, employee_id).await?;
        info!(from = %transition.from, "Employee force clocked out");
        Ok(true)
    }

    pub async fn toggle_break(&self, employee_id: &str, kind: BreakKind) -> AttendanceResult<Option<EmployeeStatus>> {
        self.apply(employee_id, Action::ToggleBreak(kind)).await
    }

    pub async fn toggle_standby(&self, employee_id: &str) -> AttendanceResult<Option<EmployeeStatus>> {
        self.apply(employee_id, Action::ToggleStandby).await
    }

    pub async fn resume_working(&self, employee_id: &str) -> AttendanceResult<Option<EmployeeStatus>> {
        self.apply(employee_id, Action::ResumeWorking).await
    }

    pub async fn mark_idle(&self, employee_id: &str) -> AttendanceResult<Option<EmployeeStatus>> {
        self.apply(employee_id, Action::MarkIdle).await
    }

    /// Runs one in-shift transition from a fresh read: move the status, then
    /// log the event. Nothing is logged for a shift that closed meanwhile.
    #[instrument(skip(self), fields(operation = "transition"))]
    async fn apply(&self, employee_id: &str, action: Action) -> AttendanceResult<Option<EmployeeStatus>> {
        let Some(mut status) = self.status(employee_id).await? else {
            debug!("Not clocked in, ignoring");
            return Ok(None);
        };
        let now = self.time.now();
        let department = self.directory.department(status.department.as_deref()).await;
        let within = schedule::is_within_schedule(now, department.as_ref());

        let Some(transition) = machine::next(status.status, action, within) else {
            debug!(status = %status.status, "Transition not allowed from current status");
            return Ok(None);
        };

        let mut breaks = status.recovered_breaks();
        match transition.event {
            EventType::StartBreak(_) => {
                breaks.start(now);
            }
            EventType::EndBreak(_) => {
                breaks.stop(now);
            }
            _ => {}
        }

        if !self.move_status(employee_id, &transition, now, Some(&breaks)).await? {
            return Ok(None);
        }
        self.record(employee_id, transition.event, now).await?;

        status.status = transition.to;
        status.state_start_time = now;
        status.breaks = breaks;
        info!(from = %transition.from, to = %transition.to, event = %transition.event, "Status changed");
        Ok(Some(status))
    }

    /// Partial update of the fields a transition owns. Returns `false` when
    /// the shift was closed underneath us.
    async fn move_status(
        &self,
        employee_id: &str,
        transition: &Transition,
        now: DateTime<Utc>,
        breaks: Option<&BreakAccumulator>,
    ) -> AttendanceResult<bool> {
        let mut patch = json!({
            "status": transition.to,
            "stateStartTime": now,
        });
        if let (Some(breaks), Some(fields)) = (breaks, patch.as_object_mut()) {
            fields.insert("breakTotalMs".into(), json!(breaks.total_ms()));
            fields.insert("breakOpenSince".into(), json!(breaks.open_since()));
        }
        match self.store.update(Collection::Status, employee_id, patch).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound { .. }) => {
                warn!("Status document vanished during transition");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Continuous guard: toggles standby when the status disagrees with the
    /// schedule window.
    pub async fn correct_schedule(&self, employee_id: &str) -> AttendanceResult<Option<EmployeeStatus>> {
        let Some(status) = self.status(employee_id).await? else {
            return Ok(None);
        };
        let department = self.directory.department(status.department.as_deref()).await;
        let within = schedule::is_within_schedule(self.time.now(), department.as_ref());
        match machine::schedule_correction(status.status, within) {
            Some(action) => self.apply(employee_id, action).await,
            None => Ok(None),
        }
    }

    /// Records overtime if it grew. Returns whether the status changed.
    #[instrument(skip(self), fields(operation = "observe_overtime"))]
    pub async fn observe_overtime(&self, employee_id: &str) -> AttendanceResult<bool> {
        let Some(mut status) = self.status(employee_id).await? else {
            return Ok(false);
        };
        if !status.status.is_on_the_clock() {
            return Ok(false);
        }
        let department = self.directory.department(status.department.as_deref()).await;
        let minutes = schedule::overtime_minutes(self.time.now(), status.shift_date, department.as_ref());
        if !status.flags.observe_overtime(minutes) {
            return Ok(false);
        }
        let patch = json!({
            "isOvertime": status.flags.is_overtime,
            "overtimeMinutes": status.flags.overtime_minutes,
        });
        match self.store.update(Collection::Status, employee_id, patch).await {
            Ok(()) => {
                info!(overtime_minutes = status.flags.overtime_minutes, "Overtime recorded");
                Ok(true)
            }
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Start-of-day move to `Working` for employees parked in standby or
    /// idle. Breaks and the break accumulator are left alone.
    #[instrument(skip(self), fields(operation = "shift_start"))]
    pub async fn resume_at_shift_start(&self, employee_id: &str) -> AttendanceResult<Option<EmployeeStatus>> {
        let Some(mut status) = self.status(employee_id).await? else {
            return Ok(None);
        };
        let event = match status.status {
            WorkStatus::Standby => EventType::EndStandby,
            WorkStatus::WorkingIdle => EventType::ResumeWorking,
            _ => return Ok(None),
        };
        let now = self.time.now();
        let transition = Transition {
            from: status.status,
            to: WorkStatus::Working,
            event,
        };
        if !self.move_status(employee_id, &transition, now, None).await? {
            return Ok(None);
        }
        self.record(employee_id, event, now).await?;
        status.status = WorkStatus::Working;
        status.state_start_time = now;
        info!(from = %transition.from, "Moved to Working at shift start");
        Ok(Some(status))
    }

    #[instrument(skip(self), fields(operation = "buzz"))]
    pub async fn buzz(&self, employee_id: &str) -> AttendanceResult<bool> {
        let patch = json!({ "shouldBuzz": true, "lastBuzzTime": self.time.now() });
        match self.store.update(Collection::Status, employee_id, patch).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn acknowledge_buzz(&self, employee_id: &str) -> AttendanceResult<bool> {
        match self.status(employee_id).await? {
            Some(status) if status.should_buzz => {}
            _ => return Ok(false),
        }
        match self
            .store
            .update(Collection::Status, employee_id, json!({ "shouldBuzz": false }))
            .await
        {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Open shifts, optionally only those in `status`.
    pub async fn active(&self, status: Option<WorkStatus>) -> AttendanceResult<Vec<EmployeeStatus>> {
        let filter = match status {
            Some(status) => Filter::all().eq("status", status.to_string()),
            None => Filter::all(),
        };
        Ok(store::query_as::<EmployeeStatus>(self.store.as_ref(), Collection::Status, &filter)
            .await?
            .into_iter()
            .map(|(_, status)| status)
            .collect())
    }

    /// Attendance log of one employee, newest first.
    pub async fn history(&self, employee_id: &str, limit: usize) -> AttendanceResult<Vec<AttendanceRecord>> {
        let filter = Filter::all().eq("employeeId", employee_id);
        let mut records = store::query_as::<AttendanceRecord>(self.store.as_ref(), Collection::Attendance, &filter)
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect::<Vec<_>>();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        Ok(records)
    }

    /// Closed shifts of one employee, newest first.
    pub async fn summaries(&self, employee_id: &str, limit: usize) -> AttendanceResult<Vec<ShiftSummary>> {
        let filter = Filter::all().eq("employeeId", employee_id);
        let mut summaries =
            store::query_as::<ShiftSummary>(self.store.as_ref(), Collection::AttendanceSummary, &filter)
                .await?
                .into_iter()
                .map(|(_, summary)| summary)
                .collect::<Vec<_>>();
        summaries.sort_by(|a, b| b.clock_in_time.cmp(&a.clock_in_time));
        summaries.truncate(limit);
        Ok(summaries)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::attendance::clock::testing::{ManualClock, manual_time};
    use crate::model::department::Department;
    use crate::store::InMemoryStore;

    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub clock: Arc<ManualClock>,
        pub service: AttendanceService,
    }

    impl Harness {
        pub async fn new(now: DateTime<Utc>, department: Option<Department>) -> Self {
            let store = Arc::new(InMemoryStore::new());
            let (clock, time) = manual_time(now);
            if let Some(department) = &department {
                store
                    .create_if_absent(Collection::Departments, &department.id, store::to_document(department).unwrap())
                    .await
                    .unwrap();
            }
            let directory = Directory::new(store.clone(), std::time::Duration::from_secs(60));
            let service = AttendanceService::new(store.clone(), time, directory, Duration::hours(1));
            Self { store, clock, service }
        }

        pub async fn hire(&self, employee_id: &str, department: Option<&str>) {
            let employee = Employee {
                employee_id: employee_id.to_string(),
                name: format!("Employee {employee_id}"),
                department: department.map(str::to_string),
                password: String::new(),
                disabled: false,
                is_admin: false,
                created_at: self.service.time().now(),
            };
            self.store
                .create_if_absent(Collection::Employees, employee_id, store::to_document(&employee).unwrap())
                .await
                .unwrap();
        }

        pub async fn events(&self, employee_id: &str) -> Vec<String> {
            let mut history = self.service.history(employee_id, usize::MAX).await.unwrap();
            history.reverse();
            history.into_iter().map(|r| r.event_type.to_string()).collect()
        }
    }
}
