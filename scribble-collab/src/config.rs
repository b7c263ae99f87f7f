//! Tunables for the sync session and the store server.
//!
//! Both load from environment variables through `envy`, after an optional
//! `.env` file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SCRIBBLE_BIND_ADDR` | [`ServerConfig::bind_addr`] |
//! | `SCRIBBLE_BROADCAST_CAPACITY` | [`ServerConfig::broadcast_capacity`] |
//! | `SCRIBBLE_MAX_CONNECTIONS` | [`ServerConfig::max_connections`] |
//! | `SCRIBBLE_SYNC_CURSOR_THROTTLE_MS` | [`SyncConfig::cursor_throttle_ms`] |
//! | `SCRIBBLE_SYNC_…` | every other [`SyncConfig`] field |

use serde::{Deserialize, Serialize};

use crate::server::ServerConfig;

pub const SERVER_ENV_PREFIX: &str = "SCRIBBLE_";
pub const SYNC_ENV_PREFIX: &str = "SCRIBBLE_SYNC_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum spacing between cursor publishes.
    pub cursor_throttle_ms: u64,
    /// Remote cursors older than this are hidden and evicted.
    pub cursor_stale_after_ms: i64,
    pub staleness_sweep_ms: u64,
    /// Pointer samples closer than this to the previous point are dropped.
    pub min_sample_distance: f64,
    /// Display refresh interval repaints are coalesced to.
    pub refresh_interval_ms: u64,
    /// Also register a disconnect remove for the user's strokes, so an
    /// abrupt disconnect clears them like a graceful one.
    pub clear_strokes_on_disconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cursor_throttle_ms: 33,
            cursor_stale_after_ms: 5_000,
            staleness_sweep_ms: 1_000,
            min_sample_distance: 2.0,
            refresh_interval_ms: 16,
            clear_strokes_on_disconnect: false,
        }
    }
}

impl SyncConfig {
    /// Load from `SCRIBBLE_SYNC_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        let config: Self = envy::prefixed(SYNC_ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.staleness_sweep_ms == 0 {
            return Err(ConfigError::Invalid("staleness_sweep_ms must be positive"));
        }
        if self.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid("refresh_interval_ms must be positive"));
        }
        if self.min_sample_distance.is_nan() || self.min_sample_distance < 0.0 {
            return Err(ConfigError::Invalid("min_sample_distance must be non-negative"));
        }
        Ok(())
    }
}

/// Load the server configuration from `SCRIBBLE_*` variables.
pub fn load_server_config() -> Result<ServerConfig, ConfigError> {
    load_dotenv();
    let config: ServerConfig = envy::prefixed(SERVER_ENV_PREFIX).from_env()?;
    log::info!("Configuration loaded: bind_addr={}", config.bind_addr);
    Ok(config)
}

fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            log::warn!("Ignoring unreadable .env file: {e}");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable error: {0}")]
    Env(#[from] envy::Error),
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
