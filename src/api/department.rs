use crate::{
    attendance::AttendanceService,
    auth::auth::AuthUser,
    model::department::{Department, Schedule},
    store::{self, Collection, StoreError},
};
use actix_web::{HttpResponse, Responder, web};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentReq {
    #[schema(example = "Support")]
    pub name: String,
    #[schema(example = "America/New_York")]
    pub timezone: String,
    pub schedule: Schedule,
}

impl DepartmentReq {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".into());
        }
        if self.timezone.trim().is_empty() {
            return Err("timezone is required".into());
        }
        self.schedule.validate()
    }

    fn into_department(self, id: String) -> Department {
        Department {
            id,
            name: self.name.trim().to_string(),
            timezone: self.timezone.trim().to_string(),
            schedule: self.schedule,
        }
    }
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({ "message": message }))
}

#[utoipa::path(
    post,
    path = "/api/departments",
    request_body = DepartmentReq,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 400, description = "Invalid schedule", body = Object, example = json!({
            "message": "clockIn (18:00) must be earlier than clockOut (09:00); overnight shifts are not supported"
        })),
        (status = 403, description = "Admin only")
    ),
    tag = "Department",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(name = %payload.name))]
pub async fn create_department(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<DepartmentReq>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let payload = payload.into_inner();
    if let Err(message) = payload.validate() {
        return Ok(bad_request(message));
    }

    let department = payload.into_department(Uuid::new_v4().to_string());
    service
        .store()
        .create_if_absent(Collection::Departments, &department.id, store::to_document(&department)?)
        .await?;

    info!(department_id = %department.id, "Department created");
    Ok(HttpResponse::Created().json(department))
}

#[utoipa::path(
    get,
    path = "/api/departments",
    responses((status = 200, description = "Departments", body = Vec<Department>)),
    tag = "Department",
    security(("bearer_auth" = []))
)]
pub async fn list_departments(service: web::Data<AttendanceService>) -> actix_web::Result<impl Responder> {
    let departments = service.directory().departments().await?;
    Ok(HttpResponse::Ok().json(departments))
}

#[utoipa::path(
    get,
    path = "/api/departments/{department_id}",
    params(("department_id", Path, description = "Department ID")),
    responses(
        (status = 200, description = "Department", body = Department),
        (status = 404, description = "Department not found")
    ),
    tag = "Department",
    security(("bearer_auth" = []))
)]
pub async fn get_department(
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    match store::get_as::<Department>(service.store().as_ref(), Collection::Departments, &path).await? {
        Some(mut department) => {
            department.id = path.into_inner();
            Ok(HttpResponse::Ok().json(department))
        }
        None => Ok(HttpResponse::NotFound().json(json!({ "message": "Department not found" }))),
    }
}

#[utoipa::path(
    put,
    path = "/api/departments/{department_id}",
    params(("department_id", Path, description = "Department ID")),
    request_body = DepartmentReq,
    responses(
        (status = 200, description = "Department updated", body = Department),
        (status = 400, description = "Invalid schedule"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Department not found")
    ),
    tag = "Department",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(department_id = %path))]
pub async fn update_department(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
    payload: web::Json<DepartmentReq>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;
    let payload = payload.into_inner();
    if let Err(message) = payload.validate() {
        return Ok(bad_request(message));
    }

    let department = payload.into_department(path.into_inner());
    match service
        .store()
        .update(Collection::Departments, &department.id, store::to_document(&department)?)
        .await
    {
        Ok(()) => {}
        Err(StoreError::NotFound { .. }) => {
            return Ok(HttpResponse::NotFound().json(json!({ "message": "Department not found" })));
        }
        Err(e) => return Err(e.into()),
    }
    service.directory().invalidate_department(&department.id).await;

    info!("Department updated");
    Ok(HttpResponse::Ok().json(department))
}

#[utoipa::path(
    delete,
    path = "/api/departments/{department_id}",
    params(("department_id", Path, description = "Department ID")),
    responses(
        (status = 200, description = "Successfully deleted"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Department not found")
    ),
    tag = "Department",
    security(("bearer_auth" = []))
)]
#[instrument(skip_all, fields(department_id = %path))]
pub async fn delete_department(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    if !service.store().delete(Collection::Departments, &path).await? {
        return Ok(HttpResponse::NotFound().json(json!({ "message": "Department not found" })));
    }
    service.directory().invalidate_department(&path).await;

    info!("Department deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Successfully deleted" })))
}
