use std::{str::FromStr, time::Duration};

use anyhow::Context;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONTROL_URL: &str = "ws://127.0.0.1:3000";
const DEFAULT_LOOKUP_BASE_URL: &str = "https://aha-music.com";
const REQUIRED_DB_VARS: [&str; 6] = [
    "DB_HOST",
    "DB_USER",
    "DB_PASS",
    "DB_DATABASE",
    "DB_PORT",
    "DB_SSL",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub browser: BrowserConfig,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    pub ssl_mode: PgSslMode,
}
impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .port(self.port)
            .ssl_mode(self.ssl_mode)
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// DevTools endpoint of an already running browser.
    pub control_url: String,
    pub lookup_base: Url,
    /// Applies to each page-load attempt separately.
    pub page_timeout: Duration,
    pub retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub continue_on_write_error: bool,
}
impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            continue_on_write_error: false,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(missing) = REQUIRED_DB_VARS.into_iter().find(|key| value(*key).is_none()) {
            anyhow::bail!("Missing {missing} from environment");
        }
        let required = |key: &str| value(key).unwrap_or_default();

        let database = DatabaseConfig {
            host: required("DB_HOST"),
            user: required("DB_USER"),
            password: required("DB_PASS"),
            database: required("DB_DATABASE"),
            port: parse_var("DB_PORT", &required("DB_PORT"))?,
            ssl_mode: parse_var("DB_SSL", &required("DB_SSL"))?,
        };

        let page_timeout = optional_var::<u64, _>(&value, "PAGE_TIMEOUT_SECS", 60)?;
        if page_timeout == 0 {
            anyhow::bail!("PAGE_TIMEOUT_SECS must be at least 1");
        }

        let lookup_base = value("LOOKUP_BASE_URL")
            .unwrap_or_else(|| DEFAULT_LOOKUP_BASE_URL.to_string());
        let browser = BrowserConfig {
            control_url: value("BROWSER_CONTROL_URL")
                .unwrap_or_else(|| DEFAULT_CONTROL_URL.to_string()),
            lookup_base: Url::parse(&lookup_base).context("Invalid LOOKUP_BASE_URL")?,
            page_timeout: Duration::from_secs(page_timeout),
            retries: optional_var(&value, "FETCH_RETRIES", 2)?,
            retry_backoff: Duration::from_secs(optional_var(
                &value,
                "FETCH_RETRY_BACKOFF_SECS",
                2,
            )?),
        };

        let pipeline = PipelineSettings {
            workers: optional_var::<usize, _>(&value, "WORKERS", 1)?.max(1),
            continue_on_write_error: optional_var(&value, "CONTINUE_ON_WRITE_ERROR", false)?,
        };

        Ok(Self {
            database,
            browser,
            pipeline,
        })
    }
}

/// Maps `LOG_LEVEL` to a tracing level. Unknown values fall back to info.
pub fn log_level(raw: Option<&str>) -> LevelFilter {
    match raw.map(str::to_lowercase).as_deref() {
        Some("error" | "fatal") => LevelFilter::ERROR,
        Some("warn" | "warning") => LevelFilter::WARN,
        Some("debug") => LevelFilter::DEBUG,
        Some("trace") => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

fn parse_var<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value {raw:?}: {e}"))
}

fn optional_var<T, F>(value: &F, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    value(key).map_or(Ok(default), |raw| parse_var(key, &raw))
}
