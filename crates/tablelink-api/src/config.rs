//! Server configuration read from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tablelink_core::retry::RetryPolicy;
use tablelink_relay::application::pairing_handlers::PairingSettings;
use tablelink_relay::application::queue::QueueSettings;
use tablelink_relay::application::sweep::SweepSettings;

use crate::error::AppError;

/// Everything the server needs at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Address to bind.
    pub addr: SocketAddr,
    /// Issuer-side polling and await window.
    pub queue: QueueSettings,
    /// Expiry sweep cadence and retention.
    pub sweep: SweepSettings,
    /// Pairing code lifetime.
    pub pairing: PairingSettings,
    /// Retry budget for store calls.
    pub retry: RetryPolicy,
}

impl ServerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or any value
    /// does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns a variable's
    /// value or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or any value
    /// does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config("DATABASE_URL environment variable must be set".into())
            })?;

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port: u16 = parsed(&lookup, "PORT", 3000)?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;

        let queue = QueueSettings {
            poll_interval: Duration::from_millis(parsed(&lookup, "RELAY_POLL_INTERVAL_MS", 1000)?),
            await_timeout: Duration::from_millis(parsed(&lookup, "RELAY_AWAIT_TIMEOUT_MS", 30_000)?),
        };
        let retention_hours: u64 = parsed(&lookup, "RELAY_RETENTION_HOURS", 24)?;
        let sweep = SweepSettings {
            interval: Duration::from_secs(parsed(&lookup, "RELAY_SWEEP_INTERVAL_SECS", 60)?),
            retention: Duration::from_secs(retention_hours.saturating_mul(60 * 60)),
        };
        let pairing = PairingSettings {
            ttl: Duration::from_secs(parsed(&lookup, "PAIRING_TTL_SECS", 600)?),
        };
        let max_attempts: u32 = parsed(&lookup, "RELAY_RETRY_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(AppError::Config(
                "RELAY_RETRY_ATTEMPTS must be at least 1".into(),
            ));
        }
        let retry = RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        };

        Ok(Self {
            database_url,
            addr,
            queue,
            sweep,
            pairing,
            retry,
        })
    }
}

fn parsed<F, T>(lookup: &F, name: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{name} is invalid: {e}"))),
    }
}
