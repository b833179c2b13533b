use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use chrono_tz::Tz;

use relay_core::sweeper::{DEFAULT_BATCH_SIZE, DEFAULT_RETENTION_DAYS};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub allowed_email_suffix: String,
    pub push_endpoint: Option<String>,
    pub push_server_key: Option<String>,
    pub sweep_timezone: Tz,
    pub sweep_hour: u32,
    pub retention_days: i64,
    pub sweep_batch_size: usize,
    pub trigger_max_attempts: u32,
    pub trigger_backoff_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("RELAY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("RELAY_JWT_SECRET is unset or still a placeholder");
        }

        let host = var("RELAY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(var("RELAY_PORT"), 3000, "RELAY_PORT")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let sweep_timezone: Tz = match var("RELAY_SWEEP_TIMEZONE") {
            Some(name) => name
                .parse()
                .map_err(|e| anyhow::anyhow!("RELAY_SWEEP_TIMEZONE '{}': {}", name, e))?,
            None => chrono_tz::America::New_York,
        };

        let sweep_hour: u32 = parse_or(var("RELAY_SWEEP_HOUR"), 0, "RELAY_SWEEP_HOUR")?;
        if sweep_hour > 23 {
            bail!("RELAY_SWEEP_HOUR must be between 0 and 23, got {}", sweep_hour);
        }

        let retention_days: i64 =
            parse_or(var("RELAY_RETENTION_DAYS"), DEFAULT_RETENTION_DAYS, "RELAY_RETENTION_DAYS")?;
        if retention_days <= 0 {
            bail!("RELAY_RETENTION_DAYS must be positive");
        }

        let sweep_batch_size: usize =
            parse_or(var("RELAY_SWEEP_BATCH_SIZE"), DEFAULT_BATCH_SIZE, "RELAY_SWEEP_BATCH_SIZE")?;
        if sweep_batch_size == 0 {
            bail!("RELAY_SWEEP_BATCH_SIZE must be positive");
        }

        let trigger_max_attempts: u32 =
            parse_or(var("RELAY_TRIGGER_MAX_ATTEMPTS"), 3, "RELAY_TRIGGER_MAX_ATTEMPTS")?;
        if trigger_max_attempts == 0 {
            bail!("RELAY_TRIGGER_MAX_ATTEMPTS must be at least 1");
        }

        Ok(Self {
            addr,
            db_path: var("RELAY_DB_PATH").unwrap_or_else(|| "relay.db".into()).into(),
            jwt_secret,
            allowed_email_suffix: var("RELAY_ALLOWED_EMAIL_SUFFIX").unwrap_or_else(|| "@example.com".into()),
            push_endpoint: var("RELAY_PUSH_ENDPOINT"),
            push_server_key: var("RELAY_PUSH_SERVER_KEY"),
            sweep_timezone,
            sweep_hour,
            retention_days,
            sweep_batch_size,
            trigger_max_attempts,
            trigger_backoff_ms: parse_or(var("RELAY_TRIGGER_BACKOFF_MS"), 2000, "RELAY_TRIGGER_BACKOFF_MS")?,
        })
    }
}

fn parse_or<T>(raw: Option<String>, default: T, key: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => v.parse().map_err(|e| anyhow::anyhow!("{} '{}': {}", key, v, e)),
        None => Ok(default),
    }
}
