use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    pub delete_window: Duration,
    pub session_inactivity: Duration,
    pub secure_cookies: bool,
    pub socket_requires_session: bool,
    pub allowed_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();

        Ok(Config {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://carechat.db?mode=rwc".to_owned()),
            bind_addr: parsed("BIND_ADDR", "0.0.0.0:8080".parse()?)?,
            db_max_connections: parsed("DB_MAX_CONNECTIONS", 16)?,
            delete_window: Duration::seconds(positive("DELETE_WINDOW_SECS", 120)?),
            session_inactivity: Duration::minutes(positive("SESSION_INACTIVITY_MINUTES", 60)?),
            secure_cookies: parsed("SECURE_COOKIES", false)?,
            socket_requires_session: parsed("SOCKET_REQUIRES_SESSION", false)?,
            allowed_origin: var("ALLOWED_ORIGIN"),
        })
    }
}

fn var(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|value| !value.is_empty())
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}={raw}")),
        None => Ok(default),
    }
}

fn positive(key: &str, default: i64) -> anyhow::Result<i64> {
    ensure_positive(key, parsed(key, default)?)
}

fn ensure_positive(key: &str, value: i64) -> anyhow::Result<i64> {
    anyhow::ensure!(value > 0, "invalid {key}={value}: must be positive");
    Ok(value)
}
