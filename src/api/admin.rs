use std::sync::Arc;

use crate::api::{applied, applied_flag};
use crate::attendance::AttendanceService;
use crate::attendance::sweeper::{ScheduleSweeper, SweepReport};
use crate::auth::auth::AuthUser;
use crate::model::status::WorkStatus;
use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActiveQuery {
    /// Only employees in this status, e.g. `Working` or `Lunch 2`.
    pub status: Option<String>,
}

/// Live roster of clocked-in employees
#[utoipa::path(
    get,
    path = "/api/admin/active",
    params(ActiveQuery),
    responses(
        (status = 200, description = "Open shifts", body = Object),
        (status = 400, description = "Unknown status"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn active(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<ActiveQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let status = match query.status.as_deref() {
        Some(raw) => match raw.parse::<WorkStatus>() {
            Ok(status) => Some(status),
            Err(e) => return Ok(HttpResponse::BadRequest().json(json!({ "message": e.to_string() }))),
        },
        None => None,
    };

    let roster = service.active(status).await?;
    Ok(HttpResponse::Ok().json(roster))
}

/// Run the schedule sweep now
#[utoipa::path(
    post,
    path = "/api/admin/sweep",
    responses(
        (status = 200, description = "What the pass did", body = SweepReport),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
#[instrument(skip_all, fields(admin = %auth.employee_id))]
pub async fn sweep(auth: AuthUser, sweeper: web::Data<Arc<ScheduleSweeper>>) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let report = sweeper.sweep_once().await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Clock an employee out without a summary
#[utoipa::path(
    post,
    path = "/api/admin/employees/{employee_id}/force-clock-out",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Whether a shift was open", body = Object, example = json!({ "applied": true })),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
#[instrument(skip_all, fields(admin = %auth.employee_id, employee_id = %path))]
pub async fn force_clock_out(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let closed = service.force_clock_out(&path).await?;
    if closed {
        info!("Admin force clock-out");
    }
    Ok(applied_flag(closed))
}

/// Close an employee's shift with a summary
#[utoipa::path(
    post,
    path = "/api/admin/employees/{employee_id}/clock-out",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Shift summary, or `applied: false`", body = Object),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
#[instrument(skip_all, fields(admin = %auth.employee_id, employee_id = %path))]
pub async fn close_shift(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let summary = service.close_shift(&path).await?;
    Ok(applied(summary))
}

/// Buzz an employee
#[utoipa::path(
    post,
    path = "/api/admin/employees/{employee_id}/buzz",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "`applied: false` when the employee is clocked out", body = Object),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn buzz(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let buzzed = service.buzz(&path).await?;
    Ok(applied_flag(buzzed))
}

/// Mark an employee as Working Idle
#[utoipa::path(
    post,
    path = "/api/admin/employees/{employee_id}/idle",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "New status, or `applied: false`", body = Object),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Admin"
)]
pub async fn mark_idle(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let status = service.mark_idle(&path).await?;
    Ok(applied(status))
}
