use crate::api::attendance::BreakReq;
use crate::api::department::DepartmentReq;
use crate::api::employee::{CreateEmployee, UpdateEmployee};
use crate::api::message::{MessageView, ReplyReq, SendMessage};
use crate::attendance::sweeper::SweepReport;
use crate::attendance::ticker::ShiftSnapshot;
use crate::model::department::{Department, Schedule};
use crate::model::employee::EmployeeView;
use crate::models::{LoginReqDto, LoginResponse};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Timeclock API",
        version = "1.0.0",
        description = r#"
## Employee attendance tracking

Employees clock in and out, take named breaks, switch to standby, and see a
live timer. Department schedules drive lateness, overtime and the automatic
clock-out at the end of the day.

### 🔹 Key Features
- **Attendance**
  - Clock-in / clock-out, breaks (`Lunch`, `Lunch 2`, `BIO 1`, `BIO 2`), standby
  - Exactly one shift summary per shift
- **Admin**
  - Live roster, buzz, force clock-out, immediate schedule sweep
- **Employees & Departments**
  - Accounts, department schedules and time zones
- **Messages**
  - Direct and broadcast messages with replies

### 🔐 Security
Endpoints under the API prefix use **JWT Bearer authentication**.
Administrative operations require an admin account.

### 📦 Response Format
- JSON responses; state changes that are not allowed in the current state
  answer `{"applied": false}` instead of an error
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::logout,

        crate::api::attendance::status,
        crate::api::attendance::clock_in,
        crate::api::attendance::clock_out,
        crate::api::attendance::toggle_break,
        crate::api::attendance::toggle_standby,
        crate::api::attendance::resume_working,
        crate::api::attendance::acknowledge_buzz,
        crate::api::attendance::history,
        crate::api::attendance::summaries,

        crate::api::admin::active,
        crate::api::admin::sweep,
        crate::api::admin::force_clock_out,
        crate::api::admin::close_shift,
        crate::api::admin::buzz,
        crate::api::admin::mark_idle,

        crate::api::employee::create_employee,
        crate::api::employee::get_employee,
        crate::api::employee::list_employees,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,
        crate::api::employee::employee_attendance,

        crate::api::department::create_department,
        crate::api::department::list_departments,
        crate::api::department::get_department,
        crate::api::department::update_department,
        crate::api::department::delete_department,

        crate::api::message::list_messages,
        crate::api::message::unread_count,
        crate::api::message::send_message,
        crate::api::message::reply
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            BreakReq,
            ShiftSnapshot,
            SweepReport,
            CreateEmployee,
            UpdateEmployee,
            EmployeeView,
            Department,
            DepartmentReq,
            Schedule,
            SendMessage,
            ReplyReq,
            MessageView
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and logout"),
        (name = "Attendance", description = "Own shift: clock, breaks, standby, history"),
        (name = "Admin", description = "Live roster and interventions"),
        (name = "Employee", description = "Employee management APIs"),
        (name = "Department", description = "Department schedules"),
        (name = "Message", description = "Messages between admins and employees"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}
