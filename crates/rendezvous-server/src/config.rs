//! Rendezvous server configuration.
//!
//! Configuration is loaded from environment variables with defaults for
//! every value.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default listener address for WebSocket and HTTP traffic.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Default WebSocket endpoint path.
pub const DEFAULT_STREAM_PATH: &str = "/apiv1/stream";

/// Default negotiation deadline, measured from connect time.
pub const DEFAULT_SESSION_TIMEOUT_SECONDS: u64 = 80;

/// Upper bound for the session deadline (one day).
pub const MAX_SESSION_TIMEOUT_SECONDS: u64 = 86_400;

/// Default per-connection mailbox capacity.
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Upper bound for the per-connection mailbox capacity.
pub const MAX_CONNECTION_BUFFER: usize = 65_536;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "rendezvous";

/// Rendezvous server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// Path of the WebSocket endpoint (default: "/apiv1/stream").
    pub stream_path: String,

    /// Seconds after connect before a session is force-closed (default: 80).
    pub session_timeout_seconds: u64,

    /// Capacity of each connection mailbox (default: 64).
    pub connection_buffer: usize,

    /// Unique identifier for this instance, used in logs.
    pub instance_id: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            session_timeout_seconds: DEFAULT_SESSION_TIMEOUT_SECONDS,
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            instance_id: generate_instance_id(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RENDEZVOUS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let stream_path = vars
            .get("RENDEZVOUS_STREAM_PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string());
        if !stream_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "RENDEZVOUS_STREAM_PATH must start with '/', got '{stream_path}'"
            )));
        }

        let session_timeout_seconds = parse_bounded(
            vars,
            "RENDEZVOUS_SESSION_TIMEOUT_SECONDS",
            DEFAULT_SESSION_TIMEOUT_SECONDS,
            MAX_SESSION_TIMEOUT_SECONDS,
        )?;

        let connection_buffer = parse_bounded(
            vars,
            "RENDEZVOUS_CONNECTION_BUFFER",
            DEFAULT_CONNECTION_BUFFER,
            MAX_CONNECTION_BUFFER,
        )?;

        let instance_id = vars
            .get("RENDEZVOUS_INSTANCE_ID")
            .cloned()
            .unwrap_or_else(generate_instance_id);

        Ok(Config {
            bind_address,
            stream_path,
            session_timeout_seconds,
            connection_buffer,
            instance_id,
        })
    }

    /// Session deadline as a `Duration`.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }
}

/// Parse `key` as a number in `1..=max`.
fn parse_bounded<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default + std::fmt::Display,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => {
            let value: T = raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{key} must be a number, got '{raw}'")))?;
            if value <= T::default() {
                return Err(ConfigError::InvalidValue(format!(
                    "{key} must be greater than zero"
                )));
            }
            if value > max {
                return Err(ConfigError::InvalidValue(format!(
                    "{key} must be at most {max}, got {value}"
                )));
            }
            Ok(value)
        }
    }
}

fn generate_instance_id() -> String {
    let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().simple().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
}
