//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`, or `None` when another
/// recorder is already installed.
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            info!("prometheus metrics recorder installed");
            Some(handle)
        }
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed");
            None
        }
    }
}

/// Render Prometheus text format from a recorder handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants shared across crates.

/// Calls served (counter, labels: function).
pub const RPC_CALLS_TOTAL: &str = "rpc_calls_total";
/// Calls answered with an error (counter, labels: function, error_type).
pub const RPC_CALL_ERRORS_TOTAL: &str = "rpc_call_errors_total";
/// Client call round-trip seconds (histogram, labels: function).
pub const RPC_CALL_DURATION_SECONDS: &str = "rpc_call_duration_seconds";
/// Websocket peers accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Websocket peers disconnected (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Upgrades refused by the connection cap (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Live websocket peers (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Peer lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Event frames not delivered to a peer (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Event handler invocations (counter, labels: event).
pub const EVENTS_DISPATCHED_TOTAL: &str = "events_dispatched_total";
