use std::env;
use std::str::FromStr;

use anyhow::{Context, bail};
use dotenvy::dotenv;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    MySql,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "mysql" => Ok(StoreBackend::MySql),
            other => bail!("unknown STORE_BACKEND `{other}` (expected memory or mysql)"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub server_addr: String,
    pub jwt_secret: String,
    pub access_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    pub store_backend: StoreBackend,
    pub database_url: Option<String>,

    // Trusted time
    pub time_api_url: String,
    pub time_zone: String,
    pub time_resync_secs: u64,
    pub time_max_age_secs: i64,

    pub sweeper_interval_secs: u64,
    pub sweeper_auto_clock_out: bool,
    pub session_tick_ms: u64,
    pub department_cache_ttl_secs: u64,

    pub bootstrap_admin_id: Option<String>,
    pub bootstrap_admin_password: Option<String>,

    pub log_dir: String,
    pub log_level: String,
}

fn var_or<T>(key: &str, default: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("invalid value `{raw}` for {key}"))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        let store_backend: StoreBackend = var_or("STORE_BACKEND", "memory")?;
        let database_url = optional("DATABASE_URL");
        if store_backend == StoreBackend::MySql && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORE_BACKEND=mysql");
        }

        Ok(Self {
            server_addr: env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            access_token_ttl: var_or("ACCESS_TOKEN_TTL", "43200")?, // 12 h, one shift

            rate_login_per_min: var_or("RATE_LOGIN_PER_MIN", "60")?,
            rate_protected_per_min: var_or("RATE_PROTECTED_PER_MIN", "1000")?,

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            store_backend,
            database_url,

            time_api_url: env::var("TIME_API_URL").unwrap_or_else(|_| "https://worldtimeapi.org/api".to_string()),
            time_zone: env::var("TIME_ZONE").unwrap_or_else(|_| "Etc/UTC".to_string()),
            time_resync_secs: var_or("TIME_RESYNC_SECS", "900")?,
            time_max_age_secs: var_or("TIME_MAX_AGE_SECS", "3600")?,

            sweeper_interval_secs: var_or("SWEEPER_INTERVAL_SECS", "60")?,
            sweeper_auto_clock_out: var_or("SWEEPER_AUTO_CLOCK_OUT", "true")?,
            session_tick_ms: var_or("SESSION_TICK_MS", "1000")?,
            department_cache_ttl_secs: var_or("DEPARTMENT_CACHE_TTL_SECS", "60")?,

            bootstrap_admin_id: optional("BOOTSTRAP_ADMIN_ID"),
            bootstrap_admin_password: optional("BOOTSTRAP_ADMIN_PASSWORD"),

            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server_addr: "127.0.0.1:0".into(),
            jwt_secret: "test-secret".into(),
            access_token_ttl: 3600,
            rate_login_per_min: 1000,
            rate_protected_per_min: 10_000,
            api_prefix: "/api".into(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            time_api_url: "http://127.0.0.1:9".into(),
            time_zone: "Etc/UTC".into(),
            time_resync_secs: 900,
            time_max_age_secs: 3600,
            sweeper_interval_secs: 60,
            sweeper_auto_clock_out: true,
            session_tick_ms: 1000,
            department_cache_ttl_secs: 60,
            bootstrap_admin_id: None,
            bootstrap_admin_password: None,
            log_dir: "logs".into(),
            log_level: "info".into(),
        }
    }
}
