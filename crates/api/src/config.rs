//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use stockledger_infra::{PostgresLedgerOptions, RetryPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Typed view of the environment for the API binary.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres connection string; `None` runs the in-memory ledger.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub ledger: PostgresLedgerOptions,
    pub retry: RetryPolicy,
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", || {
            DEFAULT_BIND_ADDR.parse::<SocketAddr>()
        })?;

        let database_url = lookup("DATABASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let database_max_connections: u32 = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", || Ok(10))?;
        if database_max_connections == 0 {
            return Err(invalid("DATABASE_MAX_CONNECTIONS", "0", "must be at least 1"));
        }

        let lock_timeout_ms: u64 = parse_or(&lookup, "LEDGER_LOCK_TIMEOUT_MS", || Ok(5_000))?;
        let max_retries: u32 = parse_or(&lookup, "LEDGER_MAX_RETRIES", || Ok(3))?;
        let base_delay_ms: u64 = parse_or(&lookup, "LEDGER_RETRY_BASE_DELAY_MS", || Ok(50))?;

        let lock_timeout = (lock_timeout_ms > 0).then(|| Duration::from_millis(lock_timeout_ms));
        let base_delay = Duration::from_millis(base_delay_ms);

        Ok(Self {
            bind_addr,
            database_url,
            database_max_connections,
            ledger: PostgresLedgerOptions { lock_timeout },
            retry: RetryPolicy::exponential(max_retries, base_delay, MAX_RETRY_DELAY.max(base_delay)),
        })
    }
}

fn parse_or<F, T, E, D>(lookup: &F, var: &'static str, default: D) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr<Err = E>,
    E: std::fmt::Display,
    D: FnOnce() -> Result<T, E>,
{
    match lookup(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(var, &raw, e.to_string())),
        None => default().map_err(|e| invalid(var, "<default>", e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}
