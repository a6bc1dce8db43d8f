use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Client settings, normally read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub http_timeout: Duration,
    pub session_db: PathBuf,
    pub cells: CellControlConfig,
}

#[derive(Debug, Clone)]
pub struct CellControlConfig {
    /// Wait between a command acknowledgement and the state re-fetch.
    /// Covers the backend -> MQTT -> controller round trip.
    pub settle_delay: Duration,
    /// Period of the background reconciliation poll.
    pub poll_interval: Duration,
    /// Cells shown to the user; also the number seeded into an empty locker.
    pub cell_count: usize,
}

impl Default for CellControlConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1500),
            poll_interval: Duration::from_secs(15),
            cell_count: 2,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http_timeout: Duration::from_secs(30),
            session_db: PathBuf::from("locker-session.db"),
            cells: CellControlConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("LOCKER_API_URL").unwrap_or_else(|_| "http://localhost:5000".into());
        let session_db =
            std::env::var("LOCKER_SESSION_DB").unwrap_or_else(|_| "locker-session.db".into());

        let timeout_secs: u64 = env_parse("LOCKER_HTTP_TIMEOUT_SECS", 30)?;
        let settle_ms: u64 = env_parse("LOCKER_CELL_SETTLE_MS", 1500)?;
        let poll_secs: u64 = env_parse("LOCKER_CELL_POLL_SECS", 15)?;
        let cell_count: usize = env_parse("LOCKER_CELL_COUNT", 2)?;

        if poll_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "LOCKER_CELL_POLL_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_timeout: Duration::from_secs(timeout_secs),
            session_db: PathBuf::from(session_db),
            cells: CellControlConfig {
                settle_delay: Duration::from_millis(settle_ms),
                poll_interval: Duration::from_secs(poll_secs),
                cell_count,
            },
        })
    }
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        Err(_) => Ok(default),
    }
}
