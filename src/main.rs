use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration as StdDuration;

mod api;
mod attendance;
mod auth;
mod config;
mod db;
mod docs;
mod model;
mod models;
mod routes;
mod store;
mod utils;

use attendance::AttendanceService;
use attendance::clock::{ResyncTask, SystemClock, TimeSource, WorldTimeApi};
use attendance::directory::Directory;
use attendance::live::LiveStatusChannel;
use attendance::sweeper::{ScheduleSweeper, SweeperConfig};
use attendance::ticker::SessionRegistry;
use config::{Config, StoreBackend};
use db::MySqlStore;
use store::{InMemoryStore, Store};

use crate::docs::ApiDoc;
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Timeclock is running"
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StoreBackend::MySql => {
            let url = config.database_url.as_deref().context("DATABASE_URL must be set")?;
            let store = MySqlStore::connect(url).await.context("failed to connect to MySQL")?;
            Ok(Arc::new(store))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO))
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let store = build_store(&config).await?;

    let trusted = WorldTimeApi::new(config.time_api_url.clone(), StdDuration::from_secs(5))
        .context("failed to build time service client")?;
    let time = Arc::new(TimeSource::new(Arc::new(SystemClock), Arc::new(trusted), config.time_zone.clone()));
    if !time.sync().await {
        warn!("Initial time sync failed, using the local clock until the next resync");
    }
    let resync = ResyncTask::spawn(time.clone(), StdDuration::from_secs(config.time_resync_secs.max(1)));

    let directory = Directory::new(store.clone(), StdDuration::from_secs(config.department_cache_ttl_secs));
    let service = AttendanceService::new(
        store.clone(),
        time.clone(),
        directory,
        chrono::Duration::seconds(config.time_max_age_secs),
    );
    let live = LiveStatusChannel::new(store.clone());
    let sessions = SessionRegistry::new(service.clone(), live, StdDuration::from_millis(config.session_tick_ms.max(1)));

    api::employee::bootstrap_admin(&service, &config).await?;

    let sweeper = ScheduleSweeper::new(
        service.clone(),
        SweeperConfig {
            interval: StdDuration::from_secs(config.sweeper_interval_secs.max(1)),
            auto_clock_out: config.sweeper_auto_clock_out,
        },
    );
    sweeper.start().await;

    let server_addr = config.server_addr.clone();
    let config_data = config.clone();
    let service_data = Data::new(service);
    let sessions_data = Data::new(sessions.clone());
    let sweeper_data = Data::new(sweeper.clone());

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(service_data.clone())
            .app_data(sessions_data.clone())
            .app_data(sweeper_data.clone())
            .app_data(Data::new(config.clone()))
            .service(index)
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    info!("Server stopped, shutting down background tasks");
    sweeper.stop().await;
    sessions.stop_all().await;
    resync.stop().await;

    Ok(())
}
