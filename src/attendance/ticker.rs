//! Per-session tick.
//!
//! Every logged-in employee gets a task that wakes once a second, works out
//! the timer displays from cached state only, and hands the continuous guard
//! and overtime writes to the service in the background. Slow storage never
//! delays a tick.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::attendance::error::AttendanceResult;
use crate::attendance::live::{LiveStatusChannel, StatusChange, StatusSubscription};
use crate::attendance::machine;
use crate::attendance::schedule;
use crate::attendance::service::AttendanceService;
use crate::model::status::{EmployeeStatus, WorkStatus};
use crate::utils::format::hms;

const STOP_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// What an employee's timer display shows at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSnapshot {
    #[schema(value_type = String, example = "Working")]
    pub status: WorkStatus,
    pub clock_in_time: Option<DateTime<Utc>>,
    pub state_start_time: Option<DateTime<Utc>>,
    pub shift_elapsed_ms: i64,
    /// Current break session only.
    pub break_elapsed_ms: i64,
    /// All breaks of the shift, the open one included.
    pub accumulated_break_ms: i64,
    pub is_late: bool,
    pub late_minutes: i64,
    pub is_overtime: bool,
    pub overtime_minutes: i64,
    pub should_buzz: bool,
    #[schema(example = "07:40:00")]
    pub shift_display: String,
    #[schema(example = "00:00:00")]
    pub break_display: String,
    #[schema(example = "00:30:00")]
    pub accumulated_break_display: String,
}

impl ShiftSnapshot {
    pub fn at(status: Option<&EmployeeStatus>, now: DateTime<Utc>) -> Self {
        let Some(status) = status else {
            return Self::clocked_out();
        };
        let breaks = status.recovered_breaks();
        let shift = (now - status.clock_in_time).max(Duration::zero());
        let current_break = breaks.elapsed_open(now);
        let accumulated = breaks.total_at(now).min(shift);

        Self {
            status: status.status,
            clock_in_time: Some(status.clock_in_time),
            state_start_time: Some(status.state_start_time),
            shift_elapsed_ms: shift.num_milliseconds(),
            break_elapsed_ms: current_break.num_milliseconds(),
            accumulated_break_ms: accumulated.num_milliseconds(),
            is_late: status.flags.is_late,
            late_minutes: status.flags.late_minutes,
            is_overtime: status.flags.is_overtime,
            overtime_minutes: status.flags.overtime_minutes,
            should_buzz: status.should_buzz,
            shift_display: hms(shift),
            break_display: hms(current_break),
            accumulated_break_display: hms(accumulated),
        }
    }

    pub fn clocked_out() -> Self {
        Self {
            status: WorkStatus::ClockedOut,
            clock_in_time: None,
            state_start_time: None,
            shift_elapsed_ms: 0,
            break_elapsed_ms: 0,
            accumulated_break_ms: 0,
            is_late: false,
            late_minutes: 0,
            is_overtime: false,
            overtime_minutes: 0,
            should_buzz: false,
            shift_display: hms(Duration::zero()),
            break_display: hms(Duration::zero()),
            accumulated_break_display: hms(Duration::zero()),
        }
    }
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    snapshots: watch::Receiver<ShiftSnapshot>,
    catch_up: mpsc::Sender<oneshot::Sender<()>>,
}

/// Session tickers of the employees currently logged in.
#[derive(Clone)]
pub struct SessionRegistry {
    service: AttendanceService,
    live: LiveStatusChannel,
    tick: StdDuration,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionRegistry {
    pub fn new(service: AttendanceService, live: LiveStatusChannel, tick: StdDuration) -> Self {
        Self {
            service,
            live,
            tick,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts ticking for `employee_id`, or joins the running ticker.
    pub async fn start(&self, employee_id: &str) -> AttendanceResult<watch::Receiver<ShiftSnapshot>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(employee_id) {
            if !session.handle.is_finished() {
                return Ok(session.snapshots.clone());
            }
        }

        let subscription = self.live.subscribe_employee(employee_id).await?;
        let (tx, rx) = watch::channel(ShiftSnapshot::clocked_out());
        let (catch_up, catch_up_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let ticker = SessionTicker {
            employee_id: employee_id.to_string(),
            service: self.service.clone(),
            status: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        };
        let handle = tokio::spawn(ticker.run(subscription, self.tick, cancel.clone(), tx, catch_up_rx));

        sessions.insert(
            employee_id.to_string(),
            Session {
                cancel,
                handle,
                snapshots: rx.clone(),
                catch_up,
            },
        );
        info!(employee_id, "Session ticker started");
        Ok(rx)
    }

    /// The running ticker's snapshot, once it has applied every status
    /// change written before this call. `None` without a running session.
    pub async fn snapshot(&self, employee_id: &str) -> Option<ShiftSnapshot> {
        let (catch_up, snapshots) = {
            let sessions = self.sessions.lock().await;
            let session = sessions.get(employee_id).filter(|session| !session.handle.is_finished())?;
            (session.catch_up.clone(), session.snapshots.clone())
        };
        let (done, caught_up) = oneshot::channel();
        catch_up.send(done).await.ok()?;
        caught_up.await.ok()?;
        let snapshot = snapshots.borrow().clone();
        Some(snapshot)
    }

    pub async fn is_active(&self, employee_id: &str) -> bool {
        self.sessions
            .lock()
            .await
            .get(employee_id)
            .is_some_and(|session| !session.handle.is_finished())
    }

    pub async fn stop(&self, employee_id: &str) {
        let session = self.sessions.lock().await.remove(employee_id);
        if let Some(session) = session {
            shutdown(employee_id, session).await;
        }
    }

    pub async fn stop_all(&self) {
        let sessions = self.sessions.lock().await.drain().collect::<Vec<_>>();
        for (employee_id, session) in sessions {
            shutdown(&employee_id, session).await;
        }
    }
}

async fn shutdown(employee_id: &str, session: Session) {
    session.cancel.cancel();
    match tokio::time::timeout(STOP_TIMEOUT, session.handle).await {
        Ok(Ok(())) => debug!(employee_id, "Session ticker stopped"),
        Ok(Err(e)) => warn!(employee_id, error = %e, "Session ticker panicked"),
        Err(_) => warn!(employee_id, "Session ticker did not stop within timeout"),
    }
}

struct SessionTicker {
    employee_id: String,
    service: AttendanceService,
    status: Option<EmployeeStatus>,
    in_flight: Arc<AtomicBool>,
}

impl SessionTicker {
    async fn run(
        mut self,
        mut subscription: StatusSubscription,
        tick: StdDuration,
        cancel: CancellationToken,
        snapshots: watch::Sender<ShiftSnapshot>,
        mut catch_up: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut feed_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = subscription.next(), if feed_open => match change {
                    Some(change) => {
                        self.observe(change);
                        self.publish(&snapshots);
                    }
                    None => {
                        warn!(employee_id = %self.employee_id, "Status feed closed, ticking on cached state");
                        feed_open = false;
                    }
                },
                Some(done) = catch_up.recv() => {
                    while let Some(change) = subscription.try_next().await {
                        self.observe(change);
                    }
                    self.publish(&snapshots);
                    let _ = done.send(());
                }
                _ = interval.tick() => {
                    self.publish(&snapshots);
                    self.enforce().await;
                }
            }
        }
    }

    fn observe(&mut self, change: StatusChange) {
        self.status = match change {
            StatusChange::Upserted(status) => Some(status),
            StatusChange::Removed(_) => None,
        };
    }

    fn publish(&self, snapshots: &watch::Sender<ShiftSnapshot>) {
        let now = self.service.time().now();
        snapshots.send_replace(ShiftSnapshot::at(self.status.as_ref(), now));
    }

    /// Continuous guard and overtime, from cached state.
    async fn enforce(&self) {
        let Some(status) = &self.status else {
            return;
        };
        let Some(department_id) = status.department.clone() else {
            return;
        };
        let directory = self.service.directory().clone();
        let Some(department) = directory.cached_department(Some(&department_id)).await else {
            // Warm the cache for the next tick.
            self.spawn_guarded("load_department", async move {
                directory.department(Some(&department_id)).await;
                Ok(())
            });
            return;
        };

        let now = self.service.time().now();
        let within = schedule::is_within_schedule(now, Some(&department));
        let service = self.service.clone();
        let employee_id = self.employee_id.clone();

        if machine::schedule_correction(status.status, within).is_some() {
            self.spawn_guarded("correct_schedule", async move {
                service.correct_schedule(&employee_id).await.map(|_| ())
            });
            return;
        }

        let mut flags = status.flags;
        let overtime = schedule::overtime_minutes(now, status.shift_date, Some(&department));
        if status.status.is_on_the_clock() && flags.observe_overtime(overtime) {
            self.spawn_guarded("observe_overtime", async move {
                service.observe_overtime(&employee_id).await.map(|_| ())
            });
        }
    }

    /// At most one background write per session at a time.
    fn spawn_guarded<F>(&self, operation: &'static str, work: F)
    where
        F: Future<Output = AttendanceResult<()>> + Send + 'static,
    {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let in_flight = self.in_flight.clone();
        let employee_id = self.employee_id.clone();
        tokio::spawn(async move {
            if let Err(e) = work.await {
                warn!(employee_id, operation, error = %e, "Session background write failed");
            }
            in_flight.store(false, Ordering::Release);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::schedule::testing::department;
    use crate::attendance::service::testing::Harness;
    use crate::model::status::BreakKind;
    use chrono::TimeZone;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ShiftSnapshot>,
        predicate: impl Fn(&ShiftSnapshot) -> bool,
    ) -> ShiftSnapshot {
        tokio::time::timeout(StdDuration::from_secs(3), async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if predicate(&snapshot) {
                        return snapshot.clone();
                    }
                }
                rx.changed().await.expect("ticker gone");
            }
        })
        .await
        .expect("condition never reached")
    }

    #[test]
    fn snapshot_displays() {
        let status = EmployeeStatus {
            employee_id: "e1".into(),
            status: WorkStatus::OnBreak(BreakKind::Lunch),
            state_start_time: utc(12, 0),
            clock_in_time: utc(9, 0),
            department: None,
            shift_date: utc(0, 0).date_naive(),
            breaks: Default::default(),
            flags: Default::default(),
            should_buzz: false,
            last_buzz_time: None,
        };
        let snapshot = ShiftSnapshot::at(Some(&status), utc(12, 10));
        assert_eq!(snapshot.shift_display, "03:10:00");
        assert_eq!(snapshot.break_display, "00:10:00");
        assert_eq!(snapshot.accumulated_break_display, "00:10:00");

        let clocked_out = ShiftSnapshot::at(None, utc(12, 10));
        assert_eq!(clocked_out.status, WorkStatus::ClockedOut);
        assert_eq!(clocked_out.shift_display, "00:00:00");
    }

    async fn registry(harness: &Harness) -> SessionRegistry {
        SessionRegistry::new(
            harness.service.clone(),
            LiveStatusChannel::new(harness.store.clone()),
            StdDuration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn ticker_follows_the_live_status() {
        let harness = Harness::new(utc(10, 0), None).await;
        harness.hire("e1", None).await;
        let sessions = registry(&harness).await;
        let mut rx = sessions.start("e1").await.unwrap();

        harness.service.clock_in("e1").await.unwrap();
        wait_for(&mut rx, |s| s.status == WorkStatus::Working).await;

        harness.clock.set(utc(11, 0));
        let snapshot = wait_for(&mut rx, |s| s.shift_elapsed_ms > 0).await;
        assert_eq!(snapshot.shift_display, "01:00:00");

        harness.service.force_clock_out("e1").await.unwrap();
        wait_for(&mut rx, |s| s.status == WorkStatus::ClockedOut).await;
        sessions.stop_all().await;
    }

    #[tokio::test]
    async fn ticker_applies_the_continuous_guard_and_overtime() {
        let harness = Harness::new(utc(16, 0), Some(department("ops", "UTC", (9, 0), (17, 0), 15, 30))).await;
        harness.hire("e1", Some("ops")).await;
        harness.service.clock_in("e1").await.unwrap();
        let sessions = registry(&harness).await;
        let mut rx = sessions.start("e1").await.unwrap();
        wait_for(&mut rx, |s| s.status == WorkStatus::Working).await;

        harness.clock.set(utc(17, 45));
        let snapshot = wait_for(&mut rx, |s| s.status == WorkStatus::Standby && s.is_overtime).await;
        assert_eq!(snapshot.overtime_minutes, 45);
        sessions.stop("e1").await;
        assert!(!sessions.is_active("e1").await);
    }

    #[tokio::test]
    async fn second_start_joins_the_running_session() {
        let harness = Harness::new(utc(10, 0), None).await;
        harness.hire("e1", None).await;
        let sessions = registry(&harness).await;
        sessions.start("e1").await.unwrap();
        sessions.start("e1").await.unwrap();
        assert!(sessions.is_active("e1").await);
        assert_eq!(sessions.sessions.lock().await.len(), 1);
        sessions.stop("e1").await;
        assert!(!sessions.is_active("e1").await);
        assert!(sessions.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn snapshot_includes_writes_made_before_the_call() {
        let harness = Harness::new(utc(10, 0), None).await;
        harness.hire("e1", None).await;
        // Ticks far apart, so only the catch-up can publish.
        let sessions = SessionRegistry::new(
            harness.service.clone(),
            LiveStatusChannel::new(harness.store.clone()),
            StdDuration::from_secs(3600),
        );
        assert!(sessions.snapshot("e1").await.is_none());
        sessions.start("e1").await.unwrap();

        harness.service.clock_in("e1").await.unwrap();
        let snapshot = sessions.snapshot("e1").await.unwrap();
        assert_eq!(snapshot.status, WorkStatus::Working);
        assert_eq!(snapshot.clock_in_time, Some(utc(10, 0)));

        harness.clock.set(utc(10, 20));
        harness.service.toggle_break("e1", BreakKind::Bio1).await.unwrap();
        harness.clock.set(utc(10, 25));
        let snapshot = sessions.snapshot("e1").await.unwrap();
        assert_eq!(snapshot.status, WorkStatus::OnBreak(BreakKind::Bio1));
        assert_eq!(snapshot.break_display, "00:05:00");
        assert_eq!(snapshot.shift_display, "00:25:00");

        harness.service.clock_out("e1").await.unwrap();
        assert_eq!(sessions.snapshot("e1").await.unwrap().status, WorkStatus::ClockedOut);

        sessions.stop("e1").await;
        assert!(sessions.snapshot("e1").await.is_none());
    }
}
