//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default; values that are present but unparseable are rejected.

use crate::actors::{RegistrySettings, RoomSettings};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_SIGNALING_BIND_ADDRESS: &str = "0.0.0.0:4000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default time an empty room stays registered before it is retired.
pub const DEFAULT_ROOM_GRACE_PERIOD_SECONDS: u64 = 5;

/// Default interval between empty-room grace checks.
pub const DEFAULT_ROOM_GRACE_CHECK_INTERVAL_MS: u64 = 1000;

/// Default maximum number of concurrently registered rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default maximum number of peers per room.
pub const DEFAULT_MAX_PEERS_PER_ROOM: usize = 50;

/// Default artificial latency injected by the in-memory media engine.
pub const DEFAULT_PROVIDER_LATENCY_MS: u64 = 0;

/// Default RC instance ID prefix.
pub const DEFAULT_RC_ID_PREFIX: &str = "rc";

/// Room Controller configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket signaling bind address (default: "0.0.0.0:4000").
    pub signaling_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this RC instance.
    pub rc_id: String,

    /// Empty-room grace period in seconds (default: 5).
    pub room_grace_period_seconds: u64,

    /// Grace check interval in milliseconds (default: 1000).
    pub room_grace_check_interval_ms: u64,

    /// Maximum concurrent rooms.
    pub max_rooms: usize,

    /// Maximum peers in a single room.
    pub max_peers_per_room: usize,

    /// Latency added to every in-memory engine call, in milliseconds.
    pub provider_latency_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_bind_address = vars
            .get("RC_SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNALING_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let room_grace_period_seconds = parse_var(
            vars,
            "RC_ROOM_GRACE_PERIOD_SECONDS",
            DEFAULT_ROOM_GRACE_PERIOD_SECONDS,
        )?;

        let room_grace_check_interval_ms = parse_var(
            vars,
            "RC_ROOM_GRACE_CHECK_INTERVAL_MS",
            DEFAULT_ROOM_GRACE_CHECK_INTERVAL_MS,
        )?;
        if room_grace_check_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_ROOM_GRACE_CHECK_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let max_rooms = parse_var(vars, "RC_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let max_peers_per_room = parse_var(vars, "RC_MAX_PEERS_PER_ROOM", DEFAULT_MAX_PEERS_PER_ROOM)?;
        if max_rooms == 0 || max_peers_per_room == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_MAX_ROOMS and RC_MAX_PEERS_PER_ROOM must be greater than zero".to_string(),
            ));
        }

        let provider_latency_ms =
            parse_var(vars, "RC_PROVIDER_LATENCY_MS", DEFAULT_PROVIDER_LATENCY_MS)?;

        // Generate RC instance ID
        let rc_id = vars.get("RC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            signaling_bind_address,
            health_bind_address,
            rc_id,
            room_grace_period_seconds,
            room_grace_check_interval_ms,
            max_rooms,
            max_peers_per_room,
            provider_latency_ms,
        })
    }

    /// Settings handed to the room registry.
    #[must_use]
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            max_rooms: self.max_rooms,
            room: RoomSettings {
                grace_period: Duration::from_secs(self.room_grace_period_seconds),
                grace_check_interval: Duration::from_millis(self.room_grace_check_interval_ms),
                max_peers: self.max_peers_per_room,
            },
        }
    }

    /// Latency for the in-memory media engine.
    #[must_use]
    pub fn provider_latency(&self) -> Duration {
        Duration::from_millis(self.provider_latency_ms)
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}
