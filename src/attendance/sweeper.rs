//! Server-side schedule enforcement.
//!
//! Runs on the host independently of any employee session. At a
//! department's clock-in time it moves parked employees back to `Working`;
//! at its clock-out time it closes every open shift of the department.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::attendance::error::{AttendanceError, AttendanceResult};
use crate::attendance::schedule;
use crate::attendance::service::AttendanceService;
use crate::model::department::Department;
use crate::model::status::WorkStatus;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Close open shifts at the department's clock-out time.
    pub auto_clock_out: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            auto_clock_out: true,
        }
    }
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub departments: usize,
    pub resumed: usize,
    pub clocked_out: usize,
    pub failures: usize,
}

pub struct ScheduleSweeper {
    service: AttendanceService,
    config: SweeperConfig,
    /// Department id → local minute of the previous pass.
    last_seen: Mutex<HashMap<String, NaiveDateTime>>,
    cancellation_token: Mutex<CancellationToken>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduleSweeper {
    pub fn new(service: AttendanceService, config: SweeperConfig) -> Arc<Self> {
        Arc::new(Self {
            service,
            config,
            last_seen: Mutex::new(HashMap::new()),
            cancellation_token: Mutex::new(CancellationToken::new()),
            task_handle: Mutex::new(None),
        })
    }

    pub async fn is_running(&self) -> bool {
        let guard = self.task_handle.lock().await;
        guard.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the periodic loop. Returns `false` if it is already running.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.is_running().await {
            return false;
        }

        let cancel = CancellationToken::new();
        *self.cancellation_token.lock().await = cancel.clone();

        let sweeper = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.config.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Sweeper loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = sweeper.sweep_once().await {
                            warn!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
        });
        *self.task_handle.lock().await = Some(handle);

        info!(interval_secs = self.config.interval.as_secs(), "Schedule sweeper started");
        true
    }

    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.cancellation_token.lock().await.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => info!("Schedule sweeper stopped"),
                Ok(Err(e)) => warn!(error = %e, "Sweeper task panicked"),
                Err(_) => warn!("Sweeper task did not complete within timeout"),
            }
        }
    }

    /// One pass over every department. Only the department listing can fail
    /// the pass; per-employee errors are logged and counted.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> AttendanceResult<SweepReport> {
        let departments = self.service.directory().departments().await?;
        let now = self.service.time().now();
        let mut report = SweepReport {
            departments: departments.len(),
            ..Default::default()
        };

        let mut last_seen = self.last_seen.lock().await;
        for department in &departments {
            let current = schedule::local_minute(now, department);
            let previous = last_seen.insert(department.id.clone(), current);

            if schedule::boundary_reached(department.schedule.clock_in, previous, current) {
                self.start_of_day(department, &mut report).await;
            }
            if self.config.auto_clock_out
                && schedule::boundary_reached(department.schedule.clock_out, previous, current)
            {
                self.end_of_day(department, &mut report).await;
            }
        }

        if report.resumed + report.clocked_out + report.failures > 0 {
            info!(
                resumed = report.resumed,
                clocked_out = report.clocked_out,
                failures = report.failures,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    async fn start_of_day(&self, department: &Department, report: &mut SweepReport) {
        for employee_id in self.open_shifts(department, report).await {
            match self.service.resume_at_shift_start(&employee_id).await {
                Ok(Some(_)) => report.resumed += 1,
                Ok(None) => {}
                Err(e) => failed(report, &employee_id, department, "shift_start", &e),
            }
        }
    }

    async fn end_of_day(&self, department: &Department, report: &mut SweepReport) {
        for employee_id in self.open_shifts(department, report).await {
            match self.service.auto_clock_out(&employee_id).await {
                Ok(Some(_)) => report.clocked_out += 1,
                Ok(None) => {}
                Err(e) => failed(report, &employee_id, department, "auto_clock_out", &e),
            }
        }
    }

    /// Employees of the department who are currently clocked in.
    async fn open_shifts(&self, department: &Department, report: &mut SweepReport) -> Vec<String> {
        let employees = match self.service.directory().employees_in(&department.id).await {
            Ok(employees) => employees,
            Err(e) => {
                report.failures += 1;
                warn!(department_id = %department.id, error = %e, "Failed to list department employees");
                return Vec::new();
            }
        };

        let mut open = Vec::new();
        for employee in employees {
            match self.service.status(&employee.employee_id).await {
                Ok(Some(status)) if status.status != WorkStatus::ClockedOut => open.push(employee.employee_id),
                Ok(_) => {}
                Err(e) => failed(report, &employee.employee_id, department, "read_status", &e),
            }
        }
        open
    }
}

fn failed(report: &mut SweepReport, employee_id: &str, department: &Department, operation: &str, e: &AttendanceError) {
    report.failures += 1;
    warn!(
        employee_id,
        department_id = %department.id,
        operation,
        transient = e.is_transient(),
        error = %e,
        "Sweep step failed"
    );
}
