use crate::{
    api::{admin, attendance, department, employee, message},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

// Helper to build per-route limiter
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            tracing::warn!(requests_per_min, "Invalid rate limit, using defaults");
            GovernorConfig::default()
        });
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(protected_limiter)
            .service(
                web::scope("/attendance")
                    .route("/status", web::get().to(attendance::status))
                    .route("/clock-in", web::post().to(attendance::clock_in))
                    .route("/clock-out", web::post().to(attendance::clock_out))
                    .route("/break", web::post().to(attendance::toggle_break))
                    .route("/standby", web::post().to(attendance::toggle_standby))
                    .route("/resume", web::post().to(attendance::resume_working))
                    .route("/buzz/ack", web::post().to(attendance::acknowledge_buzz))
                    .route("/history", web::get().to(attendance::history))
                    .route("/summaries", web::get().to(attendance::summaries)),
            )
            .service(
                web::scope("/admin")
                    .route("/active", web::get().to(admin::active))
                    .route("/sweep", web::post().to(admin::sweep))
                    // /admin/employees/{id}/...
                    .service(
                        web::scope("/employees/{id}")
                            .route("/force-clock-out", web::post().to(admin::force_clock_out))
                            .route("/clock-out", web::post().to(admin::close_shift))
                            .route("/buzz", web::post().to(admin::buzz))
                            .route("/idle", web::post().to(admin::mark_idle)),
                    ),
            )
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(employee::update_employee))
                            .route(web::get().to(employee::get_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    )
                    // /employees/{id}/attendance
                    .service(web::resource("/{id}/attendance").route(web::get().to(employee::employee_attendance))),
            )
            .service(
                web::scope("/departments")
                    .service(
                        web::resource("")
                            .route(web::post().to(department::create_department))
                            .route(web::get().to(department::list_departments)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(department::update_department))
                            .route(web::get().to(department::get_department))
                            .route(web::delete().to(department::delete_department)),
                    ),
            )
            .service(
                web::scope("/messages")
                    .service(
                        web::resource("")
                            .route(web::get().to(message::list_messages))
                            .route(web::post().to(message::send_message)),
                    )
                    .service(web::resource("/unread-count").route(web::get().to(message::unread_count)))
                    .service(web::resource("/{id}/reply").route(web::post().to(message::reply))),
            ),
    );
}

// LOGIN
//  └─ access_token (ACCESS_TOKEN_TTL, one shift by default)

// API REQUEST
//  └─ Authorization: Bearer access_token
