//! Server configuration.

use std::time::Duration;

use huddle_settings::HuddleSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the huddle server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server Ping frames in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a client is dropped, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Presence publishes allowed in a burst.
    pub publish_burst: u32,
    /// Presence publish tokens restored per second.
    pub publish_refill_per_sec: f64,
    /// How long a guest waits for the host, in milliseconds.
    pub relay_timeout_ms: u64,
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &HuddleSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            heartbeat_interval_ms: settings.server.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.server.heartbeat_timeout_ms,
            max_message_size: settings.server.max_message_bytes,
            publish_burst: settings.presence.publish_burst,
            publish_refill_per_sec: settings.presence.publish_refill_per_sec,
            relay_timeout_ms: settings.relay.request_timeout_ms,
        }
    }

    /// Heartbeat ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Guest → host relay timeout.
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 4 * 1024 * 1024,
            publish_burst: 10,
            publish_refill_per_sec: 5.0,
            relay_timeout_ms: 10_000,
        }
    }
}
