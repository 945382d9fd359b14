//! Settings types.
//!
//! Every struct is `#[serde(default)]` so a settings file only needs the keys
//! it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Upper bound for `relay.requestTimeoutMs`; RPC handlers are cut off at 60s.
pub const MAX_RELAY_TIMEOUT_MS: u64 = 55_000;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HuddleSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Presence publish quota and client coalescing.
    pub presence: PresenceSettings,
    /// Guest → host relay settings.
    pub relay: RelaySettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl HuddleSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.presence.publish_burst == 0 {
            return Err(SettingsError::InvalidValue(
                "presence.publishBurst must be at least 1".into(),
            ));
        }
        if !(self.presence.publish_refill_per_sec.is_finite()
            && self.presence.publish_refill_per_sec > 0.0)
        {
            return Err(SettingsError::InvalidValue(
                "presence.publishRefillPerSec must be a positive number".into(),
            ));
        }
        if self.relay.request_timeout_ms == 0
            || self.relay.request_timeout_ms > MAX_RELAY_TIMEOUT_MS
        {
            return Err(SettingsError::InvalidValue(format!(
                "relay.requestTimeoutMs must be between 1 and {MAX_RELAY_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server Ping frames in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a client is disconnected, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8470,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            // A 2 MiB snapshot is ~2.8 MB once base64-encoded.
            max_message_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Presence publish quota and coalescing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Token bucket capacity: publishes allowed in a burst.
    pub publish_burst: u32,
    /// Tokens restored per second.
    pub publish_refill_per_sec: f64,
    /// Client-side coalescing window in milliseconds.
    pub coalesce_window_ms: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            publish_burst: 10,
            publish_refill_per_sec: 5.0,
            coalesce_window_ms: 200,
        }
    }
}

/// Guest → host request relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// How long a guest waits for the host, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `huddle_server=debug`.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
