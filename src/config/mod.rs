//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `secrecy::SecretString` so it
//! never ends up in logs.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::queue::{DEFAULT_MAX_RETRIES, DEFAULT_VISIBILITY, QueueOptions};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Lease length in seconds (`LEASEQ_VISIBILITY_SECS`).
    pub visibility_secs: u64,
    /// Default add delay in seconds (`LEASEQ_DELAY_SECS`).
    pub delay_secs: u64,
    /// Claims allowed before dead-lettering (`LEASEQ_MAX_RETRIES`).
    pub max_retries: u32,
    /// Dead-letter queue name (`LEASEQ_DEAD_LETTER`).
    pub dead_letter: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").ok_or_else(|| {
            Error::Config("required environment variable DATABASE_URL is not set".to_string())
        })?;

        Ok(Self {
            database_url: SecretString::from(database_url),
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|s| !s.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            visibility_secs: parsed(&lookup, "LEASEQ_VISIBILITY_SECS", DEFAULT_VISIBILITY.as_secs())?,
            delay_secs: parsed(&lookup, "LEASEQ_DELAY_SECS", 0)?,
            max_retries: parsed(&lookup, "LEASEQ_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            dead_letter: lookup("LEASEQ_DEAD_LETTER").filter(|s| !s.is_empty()),
        })
    }

    /// Queue defaults derived from this configuration.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions::default()
            .visibility(Duration::from_secs(self.visibility_secs))
            .delay(Duration::from_secs(self.delay_secs))
            .max_retries(self.max_retries)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
    }
}
