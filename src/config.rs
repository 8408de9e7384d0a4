use std::{env, net::SocketAddr, str::FromStr};
use anyhow::{Context, Result};

/// Where sessions and responses live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local store seeded with the demo session.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("Unknown STORAGE_BACKEND '{}' (expected postgres or memory)", other),
        }
    }
}

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// The address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Which store backs the service.
    pub storage: StorageBackend,
    /// The URL of the PostgreSQL database.
    pub database_url: Option<String>,
    /// The maximum number of pooled database connections.
    pub db_pool_size: usize,
    /// The URL of the Redis server. Access-code throttling is off without it.
    pub redis_url: Option<String>,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
    /// Directory served for non-API paths, if any.
    pub static_dir: Option<String>,
    /// Whether `X-Forwarded-For` / `X-Real-IP` name the participant. Only
    /// true behind a reverse proxy that overwrites them.
    pub trust_forwarded: bool,
    /// Failed code attempts allowed per participant within the window.
    pub access_attempt_limit: u32,
    /// Failed code attempts allowed per address within the window. Sized for
    /// a classroom behind one NAT.
    pub access_attempt_ip_limit: u32,
    /// Length of the failed-attempt window in seconds.
    pub access_attempt_window_secs: u64,
    /// Lifetime of the anonymous ID cookie in days.
    pub anon_cookie_days: i64,
    /// Whether cookies are marked `Secure`.
    pub secure_cookies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            storage: StorageBackend::Memory,
            database_url: None,
            db_pool_size: 32,
            redis_url: None,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            static_dir: None,
            trust_forwarded: false,
            access_attempt_limit: 10,
            access_attempt_ip_limit: 200,
            access_attempt_window_secs: 900,
            anon_cookie_days: 365,
            secure_cookies: false,
        }
    }
}

fn parsed<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e))
}

fn list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let storage: StorageBackend = parsed("STORAGE_BACKEND", "postgres")?;

        let database_url = env::var("DATABASE_URL").ok();
        if storage == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when STORAGE_BACKEND=postgres");
        }

        let is_production = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string()) == "production";

        Ok(Self {
            bind_addr: parsed("BIND_ADDR", "127.0.0.1:3000")
                .context("BIND_ADDR must look like 127.0.0.1:3000")?,
            storage,
            database_url,
            db_pool_size: parsed("DB_POOL_SIZE", "32")?,
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            allowed_origins: list("ALLOWED_ORIGINS", "http://localhost:3000"),
            static_dir: env::var("STATIC_DIR").ok(),
            trust_forwarded: parsed("TRUST_FORWARDED", "false")?,
            access_attempt_limit: parsed("ACCESS_ATTEMPT_LIMIT", "10")?,
            access_attempt_ip_limit: parsed("ACCESS_ATTEMPT_IP_LIMIT", "200")?,
            access_attempt_window_secs: parsed("ACCESS_ATTEMPT_WINDOW_SECS", "900")?,
            anon_cookie_days: parsed("ANON_COOKIE_DAYS", "365")?,
            secure_cookies: is_production,
        })
    }
}
