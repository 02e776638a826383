pub mod admin;
pub mod attendance;
pub mod department;
pub mod employee;
pub mod message;

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::IntoParams;

use crate::attendance::AttendanceError;
use crate::store::StoreError;

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::UnknownEmployee(_) => StatusCode::NOT_FOUND,
            AttendanceError::Disabled(_) => StatusCode::FORBIDDEN,
            AttendanceError::Invalid(_) => StatusCode::BAD_REQUEST,
            AttendanceError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AttendanceError::Store(StoreError::Backend(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AttendanceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        HttpResponse::build(self.status_code()).json(json!({ "message": self.to_string() }))
    }
}

impl From<StoreError> for actix_web::Error {
    fn from(e: StoreError) -> Self {
        AttendanceError::Store(e).into()
    }
}

/// Body of a state-changing call: guard violations come back as
/// `"applied": false` rather than an error.
pub(crate) fn applied<T: Serialize>(result: Option<T>) -> HttpResponse {
    match result {
        Some(data) => HttpResponse::Ok().json(json!({ "applied": true, "data": data })),
        None => HttpResponse::Ok().json(json!({ "applied": false })),
    }
}

pub(crate) fn applied_flag(applied: bool) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "applied": applied }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LimitQuery {
    /// Newest entries first, at most this many (default 100).
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn value(&self) -> usize {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}
