//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// RPC requests total (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// RPC errors total (counter, labels: method, error_type).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// RPC request duration seconds (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "rpc_request_duration_seconds";
/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Events dropped because a client's send queue was full or closed (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Accepted presence publishes (counter).
pub const PRESENCE_PUBLISHES_TOTAL: &str = "presence_publishes_total";
/// Rejected presence publishes (counter, labels: reason).
pub const PRESENCE_REJECTIONS_TOTAL: &str = "presence_rejections_total";
/// Presence cleared or trimmed by the reaper (counter, labels: trigger).
pub const PRESENCE_CLEANUPS_TOTAL: &str = "presence_cleanups_total";
/// Accepted thread advertisements (counter).
pub const THREAD_ADVERTISEMENTS_TOTAL: &str = "thread_advertisements_total";
/// Guest → host relay requests (counter, labels: kind).
pub const RELAY_REQUESTS_TOTAL: &str = "relay_requests_total";
/// Failed relay requests (counter, labels: kind, reason).
pub const RELAY_FAILURES_TOTAL: &str = "relay_failures_total";
/// Relay round-trip duration (histogram, labels: kind).
pub const RELAY_DURATION_SECONDS: &str = "relay_duration_seconds";
/// Relay requests awaiting a host reply (gauge).
pub const RELAY_PENDING: &str = "relay_pending";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            RPC_REQUESTS_TOTAL,
            RPC_ERRORS_TOTAL,
            RPC_REQUEST_DURATION_SECONDS,
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_BROADCAST_DROPS_TOTAL,
            PRESENCE_PUBLISHES_TOTAL,
            PRESENCE_REJECTIONS_TOTAL,
            PRESENCE_CLEANUPS_TOTAL,
            THREAD_ADVERTISEMENTS_TOTAL,
            RELAY_REQUESTS_TOTAL,
            RELAY_FAILURES_TOTAL,
            RELAY_DURATION_SECONDS,
            RELAY_PENDING,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
