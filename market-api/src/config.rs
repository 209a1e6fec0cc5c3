//! Server configuration loaded from the environment

use std::env;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/markets.db";
const DEFAULT_BROKER_URL: &str = "memory://";
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Runtime configuration for the API server
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub port: u16,
    /// Storage connection string
    pub database_url: String,
    /// Topic broker connection string
    pub broker_url: String,
    /// Idle interval before a live stream sends a ping
    pub stream_keepalive: Duration,
    /// Per-topic buffer of the in-process broker
    pub channel_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            broker_url: DEFAULT_BROKER_URL.to_string(),
            stream_keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables
    ///
    /// Reads:
    /// - SERVER_PORT (or PORT): listen port
    /// - DATABASE_URL: `sqlite://<path>`, `sqlite::memory:` or a bare path
    /// - BROKER_URL: `memory://`
    /// - STREAM_KEEPALIVE_SECS: ping interval for idle streams
    /// - BROKER_CHANNEL_CAPACITY: per-topic buffer
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("SERVER_PORT").or_else(|| lookup("PORT")) {
            Some(raw) => parse("SERVER_PORT", &raw)?,
            None => defaults.port,
        };

        let database_url = non_empty(&lookup, "DATABASE_URL")?.unwrap_or(defaults.database_url);
        let broker_url = non_empty(&lookup, "BROKER_URL")?.unwrap_or(defaults.broker_url);

        let stream_keepalive = match lookup("STREAM_KEEPALIVE_SECS") {
            Some(raw) => Duration::from_secs(positive("STREAM_KEEPALIVE_SECS", &raw)?),
            None => defaults.stream_keepalive,
        };

        let channel_capacity = match lookup("BROKER_CHANNEL_CAPACITY") {
            Some(raw) => positive::<usize>("BROKER_CHANNEL_CAPACITY", &raw)?,
            None => defaults.channel_capacity,
        };

        Ok(Self {
            port,
            database_url,
            broker_url,
            stream_keepalive,
            channel_capacity,
        })
    }
}

fn parse<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        value: raw.to_string(),
        error: e.to_string(),
    })
}

fn positive<T>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value: T = parse(field, raw)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            field,
            value: raw.to_string(),
            error: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn non_empty<F>(lookup: &F, field: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(field) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(field)),
        Some(value) => Ok(Some(value.trim().to_string())),
        None => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {field}: {error}")]
    Invalid {
        field: &'static str,
        value: String,
        error: String,
    },

    #[error("{0} cannot be empty")]
    Empty(&'static str),
}
