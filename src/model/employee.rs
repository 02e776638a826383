use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Stored employee. `password` is an argon2 PHC string, never plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub employee_id: String,
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    pub password: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Employee as returned by the API.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(
    example = json!({
        "employeeId": "EMP-001",
        "name": "John Doe",
        "department": "2b0c6d1e-6c55-4b0e-9d61-0a4b5c1f7e11",
        "disabled": false,
        "isAdmin": false
    })
)]
pub struct EmployeeView {
    #[schema(example = "EMP-001")]
    pub employee_id: String,

    #[schema(example = "John Doe")]
    pub name: String,

    #[schema(nullable = true)]
    pub department: Option<String>,

    pub disabled: bool,

    pub is_admin: bool,
}

impl From<&Employee> for EmployeeView {
    fn from(employee: &Employee) -> Self {
        Self {
            employee_id: employee.employee_id.clone(),
            name: employee.name.clone(),
            department: employee.department.clone(),
            disabled: employee.disabled,
            is_admin: employee.is_admin,
        }
    }
}
