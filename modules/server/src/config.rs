use anyhow::{Context, bail};
use std::{env, fmt::Display, str::FromStr, time::Duration};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Single process, nothing survives a restart.
    Memory,
    /// Postgres for orders and drivers, Redis for reservations and events.
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => bail!("unknown storage backend {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub clock_interval: Duration,
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let backend: StorageBackend = try_load("STORAGE_BACKEND", "postgres")?;
        let (database_url, redis_url) = match backend {
            StorageBackend::Memory => (None, None),
            StorageBackend::Postgres => (
                Some(env::var("DATABASE_URL").context("DATABASE_URL is required")?),
                Some(env::var("REDIS_URL").context("REDIS_URL is required")?),
            ),
        };
        Ok(Self {
            port: try_load("PORT", "8080")?,
            backend,
            database_url,
            redis_url,
            clock_interval: Duration::from_secs(try_load("CLOCK_INTERVAL_SECS", "30")?),
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value {raw}: {e}"))
}
