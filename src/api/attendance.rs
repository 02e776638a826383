use crate::api::{LimitQuery, applied, applied_flag};
use crate::attendance::AttendanceService;
use crate::attendance::ticker::{SessionRegistry, ShiftSnapshot};
use crate::auth::auth::AuthUser;
use crate::model::status::BreakKind;
use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use tracing::{instrument, warn};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct BreakReq {
    /// Break label: `Lunch`, `Lunch 2`, `BIO 1` or `BIO 2`.
    #[schema(value_type = String, example = "Lunch")]
    pub kind: BreakKind,
}

/// Current status with timer displays
#[utoipa::path(
    get,
    path = "/api/attendance/status",
    responses(
        (status = 200, description = "Current shift", body = ShiftSnapshot),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn status(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    sessions: web::Data<SessionRegistry>,
) -> actix_web::Result<impl Responder> {
    // Tokens outlive a restart; the ticker does not.
    if !sessions.is_active(&auth.employee_id).await {
        if let Err(e) = sessions.start(&auth.employee_id).await {
            warn!(employee_id = %auth.employee_id, error = %e, "Failed to restart session ticker");
        }
    }
    let snapshot = match sessions.snapshot(&auth.employee_id).await {
        Some(snapshot) => snapshot,
        None => service.snapshot(&auth.employee_id).await?,
    };
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Clock-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/clock-in",
    responses(
        (status = 200, description = "Clocked in, or already clocked in (`applied: false`)", body = Object, example = json!({
            "applied": true,
            "data": { "employeeId": "EMP-001", "status": "Working", "isLate": false }
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Account disabled"),
        (status = 503, description = "Storage unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
#[instrument(skip_all, fields(employee_id = %auth.employee_id))]
pub async fn clock_in(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    sessions: web::Data<SessionRegistry>,
) -> actix_web::Result<impl Responder> {
    let status = service.clock_in(&auth.employee_id).await?;
    if status.is_some() {
        if let Err(e) = sessions.start(&auth.employee_id).await {
            warn!(error = %e, "Failed to start session ticker");
        }
    }
    Ok(applied(status))
}

/// Clock-out endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/clock-out",
    responses(
        (status = 200, description = "Shift summary, or `applied: false` when not clocked in", body = Object, example = json!({
            "applied": true,
            "data": { "totalClockTime": 27600000, "accumulatedBreak": 1800000, "isLate": false, "isOvertime": false }
        })),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Storage unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
#[instrument(skip_all, fields(employee_id = %auth.employee_id))]
pub async fn clock_out(auth: AuthUser, service: web::Data<AttendanceService>) -> actix_web::Result<impl Responder> {
    let summary = service.clock_out(&auth.employee_id).await?;
    Ok(applied(summary))
}

/// Start or end a break
#[utoipa::path(
    post,
    path = "/api/attendance/break",
    request_body = BreakReq,
    responses(
        (status = 200, description = "New status, or `applied: false` when the toggle is not allowed", body = Object),
        (status = 400, description = "Unknown break kind"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
#[instrument(skip_all, fields(employee_id = %auth.employee_id, kind = %payload.kind))]
pub async fn toggle_break(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<BreakReq>,
) -> actix_web::Result<impl Responder> {
    let status = service.toggle_break(&auth.employee_id, payload.kind).await?;
    Ok(applied(status))
}

/// Toggle standby
#[utoipa::path(
    post,
    path = "/api/attendance/standby",
    responses(
        (status = 200, description = "New status, or `applied: false`", body = Object),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn toggle_standby(auth: AuthUser, service: web::Data<AttendanceService>) -> actix_web::Result<impl Responder> {
    let status = service.toggle_standby(&auth.employee_id).await?;
    Ok(applied(status))
}

/// Leave `Working Idle`
#[utoipa::path(
    post,
    path = "/api/attendance/resume",
    responses(
        (status = 200, description = "New status, or `applied: false`", body = Object),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn resume_working(auth: AuthUser, service: web::Data<AttendanceService>) -> actix_web::Result<impl Responder> {
    let status = service.resume_working(&auth.employee_id).await?;
    Ok(applied(status))
}

/// Acknowledge an admin buzz
#[utoipa::path(
    post,
    path = "/api/attendance/buzz/ack",
    responses(
        (status = 200, description = "Whether a pending buzz was cleared", body = Object, example = json!({ "applied": true })),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn acknowledge_buzz(auth: AuthUser, service: web::Data<AttendanceService>) -> actix_web::Result<impl Responder> {
    let cleared = service.acknowledge_buzz(&auth.employee_id).await?;
    Ok(applied_flag(cleared))
}

/// Own attendance log, newest first
#[utoipa::path(
    get,
    path = "/api/attendance/history",
    params(LimitQuery),
    responses(
        (status = 200, description = "Attendance records", body = Object),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn history(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<LimitQuery>,
) -> actix_web::Result<impl Responder> {
    let records = service.history(&auth.employee_id, query.value()).await?;
    Ok(HttpResponse::Ok().json(records))
}

/// Own shift summaries, newest first
#[utoipa::path(
    get,
    path = "/api/attendance/summaries",
    params(LimitQuery),
    responses(
        (status = 200, description = "Shift summaries", body = Object),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn summaries(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<LimitQuery>,
) -> actix_web::Result<impl Responder> {
    let summaries = service.summaries(&auth.employee_id, query.value()).await?;
    Ok(HttpResponse::Ok().json(summaries))
}
