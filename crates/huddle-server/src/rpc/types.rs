//! RPC wire-format types.
//!
//! Clients send `{id, method, params}`, the server answers with
//! `{id, success, result | error}` and pushes `{type, timestamp, data}`
//! events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sent once after the upgrade with the connection's assigned peer id.
pub const CONNECTION_ESTABLISHED: &str = "connection.established";
/// A room participant's presence changed.
pub const PRESENCE_UPDATED: &str = "agentPresence.updated";
/// A project host's thread metadata, live or served from cache.
pub const THREADS_ADVERTISED: &str = "agentThreads.advertised";
/// Sent to a host: a guest wants one thread's snapshot.
pub const THREAD_OPEN_REQUESTED: &str = "agentThread.openRequested";
/// Sent to a host: a guest wants authoritative revisions.
pub const THREADS_SYNCHRONIZE_REQUESTED: &str = "agentThreads.synchronizeRequested";

/// Incoming RPC request from a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Unique request identifier.
    pub id: String,
    /// Method name (e.g. `agentPresence.update`).
    pub method: String,
    /// Optional parameters object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing RPC response to a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request identifier.
    pub id: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result payload (present when `success == true`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (present when `success == false`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Structured error body inside an `RpcResponse`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Machine-readable error code (e.g. `RATE_LIMITED`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Server-pushed event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcEvent {
    /// Event type (e.g. `agentPresence.updated`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// ISO-8601 timestamp.
    pub timestamp: String,
    /// Event payload.
    pub data: Value,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    pub fn error(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(RpcErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            }),
        }
    }
}

impl RpcEvent {
    /// Create a new event with the current UTC timestamp.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            data,
        }
    }

    /// Serialize `payload` as the event data.
    ///
    /// Falls back to `null` data if the payload cannot be represented as
    /// JSON, which no type in this crate does.
    pub fn from_payload(event_type: impl Into<String>, payload: &impl Serialize) -> Self {
        Self::new(
            event_type,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }
}
