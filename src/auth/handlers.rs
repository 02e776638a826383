use crate::{
    attendance::{AttendanceService, ticker::SessionRegistry},
    auth::{auth::AuthUser, jwt::generate_access_token, password::verify_password},
    config::Config,
    model::employee::EmployeeView,
    models::{LoginReqDto, LoginResponse},
};
use actix_web::{HttpResponse, Responder, web};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing credentials"),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Account disabled"),
        (status = 500, description = "Internal server error")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(service, sessions, config, user),
    fields(employee_id = %user.employee_id)
)]
pub async fn login(
    user: web::Json<LoginReqDto>,
    service: web::Data<AttendanceService>,
    sessions: web::Data<SessionRegistry>,
    config: web::Data<Config>,
) -> impl Responder {
    info!("Login request received");

    if user.employee_id.trim().is_empty() || user.password.is_empty() {
        info!("Validation failed: empty employee id or password");
        return HttpResponse::BadRequest().json(json!({"message": "Employee id and password required"}));
    }

    debug!("Fetching employee");

    let employee = match service.directory().employee(user.employee_id.trim()).await {
        Ok(Some(employee)) => employee,
        Ok(None) => {
            info!("Invalid credentials: employee not found");
            return HttpResponse::Unauthorized().json(json!({"message": "Invalid credentials"}));
        }
        Err(e) => {
            error!(error = %e, "Store error while fetching employee");
            return HttpResponse::InternalServerError().finish();
        }
    };

    if let Err(e) = verify_password(&user.password, &employee.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return HttpResponse::Unauthorized().json(json!({"message": "Invalid credentials"}));
    }

    if employee.disabled {
        info!("Login refused: account disabled");
        return HttpResponse::Forbidden().json(json!({"message": "Account disabled"}));
    }

    let access_token = match generate_access_token(
        &employee.employee_id,
        employee.is_admin,
        &config.jwt_secret,
        config.access_token_ttl,
    ) {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "Failed to sign access token");
            return HttpResponse::InternalServerError().finish();
        }
    };

    // The session ticker drives the timer display and the schedule guard.
    if let Err(e) = sessions.start(&employee.employee_id).await {
        warn!(error = %e, "Failed to start session ticker");
    }

    info!("Login successful");

    HttpResponse::Ok().json(LoginResponse {
        access_token,
        employee: EmployeeView::from(&employee),
    })
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
#[instrument(name = "auth_logout", skip_all, fields(employee_id = %auth.employee_id))]
pub async fn logout(auth: AuthUser, sessions: web::Data<SessionRegistry>) -> impl Responder {
    sessions.stop(&auth.employee_id).await;
    info!("Logged out");
    HttpResponse::NoContent().finish()
}
