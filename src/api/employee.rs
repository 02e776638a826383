use crate::{
    api::LimitQuery,
    attendance::{AttendanceError, AttendanceService, ticker::SessionRegistry},
    auth::{auth::AuthUser, password::hash_password},
    model::employee::{Employee, EmployeeView},
    config::Config,
    store::{self, Collection, Filter, StoreError},
};
use anyhow::Context;
use actix_web::{HttpResponse, Responder, error::ErrorInternalServerError, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmployee {
    #[schema(example = "EMP-001")]
    pub employee_id: String,
    #[schema(example = "John Doe")]
    pub name: String,
    #[schema(example = "2b0c6d1e-6c55-4b0e-9d61-0a4b5c1f7e11")]
    pub department: Option<String>,
    #[schema(example = "change-me")]
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmployee {
    pub name: Option<String>,
    /// Empty string removes the department.
    pub department: Option<String>,
    pub password: Option<String>,
    pub disabled: Option<bool>,
    pub is_admin: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EmployeeQuery {
    pub department: Option<String>,
    pub include_disabled: Option<bool>,
}

async fn ensure_department(service: &AttendanceService, department: Option<&str>) -> actix_web::Result<()> {
    let Some(id) = department else {
        return Ok(());
    };
    if service.store().get(Collection::Departments, id).await?.is_none() {
        return Err(AttendanceError::Invalid(format!("department {id} does not exist")).into());
    }
    Ok(())
}

/// Seeds the configured administrator account when it does not exist yet.
/// An existing account is left untouched.
pub async fn bootstrap_admin(service: &AttendanceService, config: &Config) -> anyhow::Result<()> {
    let (Some(employee_id), Some(password)) = (&config.bootstrap_admin_id, &config.bootstrap_admin_password) else {
        return Ok(());
    };

    let admin = Employee {
        employee_id: employee_id.clone(),
        name: "Administrator".to_string(),
        department: None,
        password: hash_password(password).map_err(|e| anyhow::anyhow!("failed to hash admin password: {e}"))?,
        disabled: false,
        is_admin: true,
        created_at: Utc::now(),
    };
    let created = service
        .store()
        .create_if_absent(Collection::Employees, employee_id, store::to_document(&admin)?)
        .await
        .context("failed to seed admin account")?;
    if created {
        info!(employee_id = %employee_id, "Bootstrap admin created");
    }
    Ok(())
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = EmployeeView),
        (status = 400, description = "Invalid payload", body = Object, example = json!({
            "message": "employeeId, name and password are required"
        })),
        (status = 403, description = "Admin only"),
        (status = 409, description = "Employee id taken", body = Object, example = json!({
            "message": "Employee already exists"
        }))
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(employee_id = %payload.employee_id))]
pub async fn create_employee(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<CreateEmployee>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let employee_id = payload.employee_id.trim();
    if employee_id.is_empty() || payload.name.trim().is_empty() || payload.password.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({
            "message": "employeeId, name and password are required"
        })));
    }
    ensure_department(&service, payload.department.as_deref()).await?;

    let password = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        ErrorInternalServerError("Internal Server Error")
    })?;

    let employee = Employee {
        employee_id: employee_id.to_string(),
        name: payload.name.trim().to_string(),
        department: payload.department.clone(),
        password,
        disabled: false,
        is_admin: payload.is_admin,
        created_at: Utc::now(),
    };

    let created = service
        .store()
        .create_if_absent(Collection::Employees, employee_id, store::to_document(&employee)?)
        .await?;
    if !created {
        return Ok(HttpResponse::Conflict().json(json!({
            "message": "Employee already exists"
        })));
    }

    info!("Employee created");
    Ok(HttpResponse::Created().json(EmployeeView::from(&employee)))
}

#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Employees", body = Vec<EmployeeView>),
        (status = 403, description = "Admin only")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<EmployeeQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let mut filter = Filter::all();
    if let Some(department) = &query.department {
        filter = filter.eq("department", department.as_str());
    }
    if !query.include_disabled.unwrap_or(true) {
        filter = filter.eq("disabled", false);
    }

    let employees = store::query_as::<Employee>(service.store().as_ref(), Collection::Employees, &filter)
        .await?
        .iter()
        .map(|(_, employee)| EmployeeView::from(employee))
        .collect::<Vec<_>>();

    Ok(HttpResponse::Ok().json(employees))
}

/// Update Employee
#[utoipa::path(
    put,
    path = "/api/employees/{employee_id}",
    params(("employee_id", Path, description = "Employee ID")),
    request_body = UpdateEmployee,
    responses(
        (status = 200, description = "Employee updated successfully", body = Object, example = json!({
            "message": "Employee updated successfully"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(employee_id = %path))]
pub async fn update_employee(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    sessions: web::Data<SessionRegistry>,
    path: web::Path<String>,
    body: web::Json<UpdateEmployee>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let employee_id = path.into_inner();

    let mut patch = Map::new();
    if let Some(name) = &body.name {
        patch.insert("name".into(), json!(name.trim()));
    }
    match body.department.as_deref() {
        Some("") => {
            patch.insert("department".into(), Value::Null);
        }
        Some(department) => {
            ensure_department(&service, Some(department)).await?;
            patch.insert("department".into(), json!(department));
        }
        None => {}
    }
    if let Some(password) = &body.password {
        let hashed = hash_password(password).map_err(|e| {
            error!(error = %e, "Failed to hash password");
            ErrorInternalServerError("Internal Server Error")
        })?;
        patch.insert("password".into(), json!(hashed));
    }
    if let Some(disabled) = body.disabled {
        patch.insert("disabled".into(), json!(disabled));
    }
    if let Some(is_admin) = body.is_admin {
        patch.insert("isAdmin".into(), json!(is_admin));
    }

    match service
        .store()
        .update(Collection::Employees, &employee_id, Value::Object(patch))
        .await
    {
        Ok(()) => {}
        Err(StoreError::NotFound { .. }) => {
            return Ok(HttpResponse::NotFound().json(json!({ "message": "Employee not found" })));
        }
        Err(e) => return Err(e.into()),
    }

    if body.disabled == Some(true) {
        sessions.stop(&employee_id).await;
    }

    info!("Employee updated");
    Ok(HttpResponse::Ok().json(json!({ "message": "Employee updated successfully" })))
}

/// Delete Employee. Attendance history is kept.
#[utoipa::path(
    delete,
    path = "/api/employees/{employee_id}",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Successfully deleted", body = Object, example = json!({
            "message": "Successfully deleted"
        })),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(employee_id = %path))]
pub async fn delete_employee(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    sessions: web::Data<SessionRegistry>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let employee_id = path.into_inner();

    if !service.store().delete(Collection::Employees, &employee_id).await? {
        return Ok(HttpResponse::NotFound().json(json!({
            "message": "Employee not found"
        })));
    }
    sessions.stop(&employee_id).await;

    info!("Employee deleted");
    Ok(HttpResponse::Ok().json(json!({
        "message": "Successfully deleted"
    })))
}

/// Get Employee by ID
#[utoipa::path(
    get,
    path = "/api/employees/{employee_id}",
    params(("employee_id", Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = EmployeeView),
        (status = 403, description = "Not allowed"),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "Employee not found"
        }))
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    auth.require_self_or_admin(&path)?;

    match service.directory().employee(&path).await? {
        Some(employee) => Ok(HttpResponse::Ok().json(EmployeeView::from(&employee))),
        None => Ok(HttpResponse::NotFound().json(json!({
            "message": "Employee not found"
        }))),
    }
}

/// Attendance log and shift summaries of one employee
#[utoipa::path(
    get,
    path = "/api/employees/{employee_id}/attendance",
    params(("employee_id", Path, description = "Employee ID"), LimitQuery),
    responses(
        (status = 200, description = "Records and summaries, newest first", body = Object),
        (status = 403, description = "Not allowed")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn employee_attendance(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
    query: web::Query<LimitQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_self_or_admin(&path)?;

    let records = service.history(&path, query.value()).await?;
    let summaries = service.summaries(&path, query.value()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "records": records,
        "summaries": summaries,
    })))
}
