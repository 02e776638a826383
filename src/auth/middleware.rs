use crate::attendance::AttendanceService;
use crate::auth::auth::{AuthUser, bearer_token};
use crate::auth::jwt::verify_token;
use crate::config::Config;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    http::StatusCode,
    web::Data,
};
use serde_json::json;
use tracing::warn;

fn reject(req: ServiceRequest, status: StatusCode, message: &str) -> ServiceResponse<BoxBody> {
    let resp = HttpResponse::build(status).json(json!({ "message": message }));
    req.into_response(resp.map_into_boxed_body())
}

/// Verifies the bearer token, then re-reads the account: tokens live for a
/// whole shift, and disabling or deleting an employee takes effect at once.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?;

    let token = match bearer_token(req.headers()) {
        Ok(token) => token.to_string(),
        Err(message) => return Ok(reject(req, StatusCode::UNAUTHORIZED, message)),
    };

    let claims = match verify_token(&token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            let resp = HttpResponse::Unauthorized()
                .json(json!({"message": "Invalid or expired token", "details": e}));
            return Ok(req.into_response(resp.map_into_boxed_body()));
        }
    };

    let mut auth_user = AuthUser {
        employee_id: claims.sub,
        is_admin: claims.is_admin,
    };

    if let Some(service) = req.app_data::<Data<AttendanceService>>().cloned() {
        match service.directory().employee(&auth_user.employee_id).await {
            Ok(Some(employee)) if employee.disabled => {
                return Ok(reject(req, StatusCode::FORBIDDEN, "Account disabled"));
            }
            Ok(Some(employee)) => auth_user.is_admin = employee.is_admin,
            Ok(None) => {
                return Ok(reject(req, StatusCode::UNAUTHORIZED, "Account no longer exists"));
            }
            Err(e) => {
                warn!(employee_id = %auth_user.employee_id, error = %e, "Account lookup failed");
                return Ok(reject(req, StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable"));
            }
        }
    }

    req.extensions_mut().insert(auth_user);

    next.call(req).await
}
