use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};

use crate::attendance::clock::TimeSource;
use crate::attendance::directory::Directory;
use crate::attendance::error::AttendanceResult;
use crate::attendance::schedule;
use crate::model::attendance::{AttendanceRecord, EventType, FinalizeReason, ShiftSummary};
use crate::model::department::Department;
use crate::model::status::EmployeeStatus;
use crate::store::{self, Collection, Filter, Store};

/// Closes shifts. Whoever gets here first (the employee, an admin, the
/// sweeper) writes the summary; everyone else finds the claim taken and
/// backs off.
#[derive(Clone)]
pub struct ShiftFinalizer {
    store: Arc<dyn Store>,
    time: Arc<TimeSource>,
    directory: Directory,
}

/// Summary of the shift described by `status` if it ended at `now`.
pub fn summarize(
    status: &EmployeeStatus,
    now: DateTime<Utc>,
    department: Option<&Department>,
    reason: FinalizeReason,
) -> ShiftSummary {
    let mut breaks = status.recovered_breaks();
    breaks.flush(now);

    let total = (now - status.clock_in_time).max(Duration::zero()).num_milliseconds();
    let accumulated = breaks.total_ms().clamp(0, total);

    let mut flags = status.flags;
    if status.status.is_on_the_clock() {
        flags.observe_overtime(schedule::overtime_minutes(now, status.shift_date, department));
    }

    ShiftSummary {
        employee_id: status.employee_id.clone(),
        shift_date: status.shift_date,
        clock_in_time: status.clock_in_time,
        clock_out_time: now,
        total_clock_time: total,
        accumulated_break: accumulated,
        is_late: flags.is_late,
        late_minutes: flags.late_minutes,
        is_overtime: flags.is_overtime,
        overtime_minutes: flags.overtime_minutes,
        department: status.department.clone(),
        closed_by: reason,
    }
}

impl ShiftFinalizer {
    pub fn new(store: Arc<dyn Store>, time: Arc<TimeSource>, directory: Directory) -> Self {
        Self {
            store,
            time,
            directory,
        }
    }

    /// Returns the summary written, or `None` when there was no open shift or
    /// another actor already closed it.
    #[instrument(skip(self), fields(operation = "finalize"))]
    pub async fn finalize(&self, employee_id: &str, reason: FinalizeReason) -> AttendanceResult<Option<ShiftSummary>> {
        let Some(status) =
            store::get_as::<EmployeeStatus>(self.store.as_ref(), Collection::Status, employee_id).await?
        else {
            debug!("No open shift to finalize");
            return Ok(None);
        };

        let now = self.time.now();
        let department = self.directory.department(status.department.as_deref()).await;

        if reason == FinalizeReason::Auto && self.already_closed(&status, department.as_ref()).await? {
            info!("Shift already has a clock-out record, skipping");
            self.release(&status).await?;
            return Ok(None);
        }

        let summary = summarize(&status, now, department.as_ref(), reason);
        let key = ShiftSummary::key(employee_id, status.clock_in_time);
        let claimed = self
            .store
            .create_if_absent(Collection::AttendanceSummary, &key, store::to_document(&summary)?)
            .await?;
        if !claimed {
            info!("Shift was finalized by another actor");
            // The claimant may have failed before writing its record.
            if let Some(stored) =
                store::get_as::<ShiftSummary>(self.store.as_ref(), Collection::AttendanceSummary, &key).await?
            {
                self.record_clock_out(&key, &stored).await?;
            }
            self.release(&status).await?;
            return Ok(None);
        }

        self.record_clock_out(&key, &summary).await?;
        self.release(&status).await?;

        info!(
            total_clock_ms = summary.total_clock_time,
            break_ms = summary.accumulated_break,
            is_late = summary.is_late,
            is_overtime = summary.is_overtime,
            "Shift finalized"
        );
        Ok(Some(summary))
    }

    /// Writes the shift's `clockOut` record; a no-op once it exists.
    async fn record_clock_out(&self, key: &str, summary: &ShiftSummary) -> AttendanceResult<()> {
        let mut record = AttendanceRecord::new(&summary.employee_id, EventType::ClockOut, summary.clock_out_time);
        record.summary = Some(summary.clone());
        self.store
            .create_if_absent(
                Collection::Attendance,
                &format!("{key}:clockOut"),
                store::to_document(&record)?,
            )
            .await?;
        Ok(())
    }

    /// Looks for a `clockOut` of this very shift within its department day.
    async fn already_closed(&self, status: &EmployeeStatus, department: Option<&Department>) -> AttendanceResult<bool> {
        let (start, end) = schedule::day_bounds(status.clock_in_time, department);
        let filter = Filter::all()
            .eq("employeeId", status.employee_id.as_str())
            .eq("eventType", EventType::ClockOut.to_string())
            .gte("timestamp", start.to_rfc3339())
            .lt("timestamp", end.to_rfc3339());
        let records = store::query_as::<AttendanceRecord>(self.store.as_ref(), Collection::Attendance, &filter).await?;
        Ok(records.iter().any(|(_, record)| {
            record
                .summary
                .as_ref()
                .is_some_and(|summary| summary.clock_in_time == status.clock_in_time)
        }))
    }

    /// Removes the live status, unless a new shift has replaced it meanwhile.
    async fn release(&self, status: &EmployeeStatus) -> AttendanceResult<()> {
        let current =
            store::get_as::<EmployeeStatus>(self.store.as_ref(), Collection::Status, &status.employee_id).await?;
        if current.is_some_and(|current| current.clock_in_time == status.clock_in_time) {
            self.store.delete(Collection::Status, &status.employee_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::breaks::BreakAccumulator;
    use crate::attendance::clock::testing::manual_time;
    use crate::attendance::schedule::testing::department;
    use crate::model::status::{BreakKind, ShiftFlags, WorkStatus};
    use crate::store::{ChangeEvent, InMemoryStore, StoreError, StoreResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    fn open_shift(status: WorkStatus, clock_in: DateTime<Utc>, state_start: DateTime<Utc>) -> EmployeeStatus {
        EmployeeStatus {
            employee_id: "e1".into(),
            status,
            state_start_time: state_start,
            clock_in_time: clock_in,
            department: Some("ops".into()),
            shift_date: clock_in.date_naive(),
            breaks: BreakAccumulator::default(),
            flags: ShiftFlags::default(),
            should_buzz: false,
            last_buzz_time: None,
        }
    }

    async fn setup(now: DateTime<Utc>) -> (Arc<InMemoryStore>, ShiftFinalizer) {
        let store = Arc::new(InMemoryStore::new());
        let (_clock, time) = manual_time(now);
        let dept = department("ops", "UTC", (9, 0), (17, 0), 15, 30);
        store
            .create_if_absent(Collection::Departments, "ops", store::to_document(&dept).unwrap())
            .await
            .unwrap();
        let directory = Directory::new(store.clone(), std::time::Duration::from_secs(60));
        let finalizer = ShiftFinalizer::new(store.clone(), time, directory);
        (store, finalizer)
    }

    async fn clock_out_records(store: &InMemoryStore) -> usize {
        let filter = Filter::all().eq("eventType", "clockOut");
        store.query(Collection::Attendance, &filter).await.unwrap().len()
    }

    #[test]
    fn open_break_is_flushed_into_summary() {
        let status = open_shift(WorkStatus::OnBreak(BreakKind::Lunch), utc(9, 0), utc(12, 0));
        let summary = summarize(&status, utc(12, 45), None, FinalizeReason::Manual);
        assert_eq!(summary.accumulated_break, Duration::minutes(45).num_milliseconds());
        assert_eq!(summary.total_clock_time, Duration::minutes(225).num_milliseconds());
    }

    #[test]
    fn break_never_exceeds_clock_time() {
        let mut status = open_shift(WorkStatus::Working, utc(9, 0), utc(9, 0));
        // A break recorded under a badly skewed clock.
        status.breaks.start(utc(7, 0));
        status.breaks.stop(utc(9, 30));
        let summary = summarize(&status, utc(9, 10), None, FinalizeReason::Manual);
        assert!(summary.total_clock_time >= summary.accumulated_break);
        assert!(summary.accumulated_break >= 0);

        let summary = summarize(&status, utc(8, 0), None, FinalizeReason::Manual);
        assert_eq!(summary.total_clock_time, 0);
        assert_eq!(summary.accumulated_break, 0);
    }

    #[tokio::test]
    async fn finalize_writes_record_summary_and_clears_status() {
        let (store, finalizer) = setup(utc(17, 0)).await;
        let mut status = open_shift(WorkStatus::Working, utc(9, 0), utc(9, 0));
        status.breaks.start(utc(12, 0));
        status.breaks.stop(utc(12, 30));
        store
            .create_if_absent(Collection::Status, "e1", store::to_document(&status).unwrap())
            .await
            .unwrap();

        let summary = finalizer.finalize("e1", FinalizeReason::Manual).await.unwrap().unwrap();
        assert_eq!(summary.total_clock_time, Duration::hours(8).num_milliseconds());
        assert_eq!(summary.accumulated_break, Duration::minutes(30).num_milliseconds());
        assert_eq!(summary.closed_by, FinalizeReason::Manual);

        assert!(store.get(Collection::Status, "e1").await.unwrap().is_none());
        assert_eq!(clock_out_records(&store).await, 1);
        let key = ShiftSummary::key("e1", utc(9, 0));
        assert!(store.get(Collection::AttendanceSummary, &key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn auto_finalize_twice_writes_one_record() {
        let (store, finalizer) = setup(utc(17, 0)).await;
        let status = open_shift(WorkStatus::Standby, utc(9, 0), utc(9, 0));
        store
            .create_if_absent(Collection::Status, "e1", store::to_document(&status).unwrap())
            .await
            .unwrap();

        assert!(finalizer.finalize("e1", FinalizeReason::Auto).await.unwrap().is_some());
        assert!(finalizer.finalize("e1", FinalizeReason::Auto).await.unwrap().is_none());
        assert_eq!(clock_out_records(&store).await, 1);
    }

    #[tokio::test]
    async fn stale_status_of_a_closed_shift_is_released_without_a_second_summary() {
        let (store, finalizer) = setup(utc(17, 0)).await;
        let status = open_shift(WorkStatus::Working, utc(9, 0), utc(9, 0));
        let doc = store::to_document(&status).unwrap();
        store.create_if_absent(Collection::Status, "e1", doc.clone()).await.unwrap();
        finalizer.finalize("e1", FinalizeReason::Manual).await.unwrap();

        // A slow client re-publishes the status it last saw.
        store.create_if_absent(Collection::Status, "e1", doc).await.unwrap();
        assert!(finalizer.finalize("e1", FinalizeReason::Auto).await.unwrap().is_none());
        assert!(store.get(Collection::Status, "e1").await.unwrap().is_none());
        assert_eq!(clock_out_records(&store).await, 1);

        store
            .create_if_absent(Collection::Status, "e1", store::to_document(&status).unwrap())
            .await
            .unwrap();
        assert!(finalizer.finalize("e1", FinalizeReason::Manual).await.unwrap().is_none());
        assert_eq!(clock_out_records(&store).await, 1);
    }

    #[tokio::test]
    async fn concurrent_finalizers_produce_one_summary() {
        let (store, finalizer) = setup(utc(17, 0)).await;
        let status = open_shift(WorkStatus::Working, utc(9, 0), utc(9, 0));
        store
            .create_if_absent(Collection::Status, "e1", store::to_document(&status).unwrap())
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            finalizer.finalize("e1", FinalizeReason::Manual),
            finalizer.finalize("e1", FinalizeReason::Auto)
        );
        let written = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(written, 1);
        assert_eq!(clock_out_records(&store).await, 1);
        let summaries = store.query(Collection::AttendanceSummary, &Filter::all()).await.unwrap();
        assert_eq!(summaries.len(), 1);
    }

    /// Loses the first attendance write, as a dropped connection would.
    struct DropsFirstRecord {
        inner: Arc<InMemoryStore>,
        dropped: AtomicBool,
    }

    #[async_trait]
    impl Store for DropsFirstRecord {
        async fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<Value>> {
            self.inner.get(collection, id).await
        }
        async fn query(&self, collection: Collection, filter: &Filter) -> StoreResult<Vec<(String, Value)>> {
            self.inner.query(collection, filter).await
        }
        async fn create(&self, collection: Collection, doc: Value) -> StoreResult<String> {
            self.inner.create(collection, doc).await
        }
        async fn create_if_absent(&self, collection: Collection, id: &str, doc: Value) -> StoreResult<bool> {
            if collection == Collection::Attendance && !self.dropped.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Backend("connection reset".into()));
            }
            self.inner.create_if_absent(collection, id, doc).await
        }
        async fn update(&self, collection: Collection, id: &str, patch: Value) -> StoreResult<()> {
            self.inner.update(collection, id, patch).await
        }
        async fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
            self.inner.delete(collection, id).await
        }
        fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test]
    async fn retry_after_a_failed_record_write_completes_the_shift() {
        let (inner, _) = setup(utc(17, 0)).await;
        let status = open_shift(WorkStatus::Working, utc(9, 0), utc(9, 0));
        inner
            .create_if_absent(Collection::Status, "e1", store::to_document(&status).unwrap())
            .await
            .unwrap();
        let flaky: Arc<dyn Store> = Arc::new(DropsFirstRecord {
            inner: inner.clone(),
            dropped: AtomicBool::new(false),
        });
        let (_clock, time) = manual_time(utc(17, 0));
        let directory = Directory::new(flaky.clone(), std::time::Duration::from_secs(60));
        let finalizer = ShiftFinalizer::new(flaky, time, directory);

        // Summary claimed, record lost, status left behind.
        assert!(finalizer.finalize("e1", FinalizeReason::Manual).await.is_err());
        assert_eq!(clock_out_records(&inner).await, 0);
        assert!(inner.get(Collection::Status, "e1").await.unwrap().is_some());

        assert!(finalizer.finalize("e1", FinalizeReason::Manual).await.unwrap().is_none());
        assert_eq!(clock_out_records(&inner).await, 1);
        assert!(inner.get(Collection::Status, "e1").await.unwrap().is_none());
        let summaries = inner.query(Collection::AttendanceSummary, &Filter::all()).await.unwrap();
        assert_eq!(summaries.len(), 1);

        let filter = Filter::all().eq("eventType", "clockOut");
        let (_, record) = inner.query(Collection::Attendance, &filter).await.unwrap().remove(0);
        let record: AttendanceRecord = serde_json::from_value(record).unwrap();
        assert_eq!(record.timestamp, utc(17, 0));
        assert_eq!(record.summary.map(|s| s.clock_in_time), Some(utc(9, 0)));
    }
}
