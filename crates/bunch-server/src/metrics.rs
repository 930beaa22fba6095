//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Render handle for the installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    inner: PrometheusHandle,
}

impl MetricsHandle {
    /// Render Prometheus text format.
    pub fn render(&self) -> String {
        self.inner.render()
    }
}

/// Install the global Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<MetricsHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(MetricsHandle { inner: handle })
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Transport lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Handshake auth rejections total (counter).
pub const AUTH_FAILURES_TOTAL: &str = "auth_failures_total";
/// New subscriptions total (counter).
pub const SUBSCRIPTIONS_TOTAL: &str = "subscriptions_total";
/// Messages persisted total (counter).
pub const MESSAGES_CREATED_TOTAL: &str = "messages_created_total";
/// Reaction toggles total (counter).
pub const REACTIONS_TOGGLED_TOTAL: &str = "reactions_toggled_total";
/// Events fanned out total (counter).
pub const EVENTS_DISPATCHED_TOTAL: &str = "events_dispatched_total";
/// Connections evicted for heartbeat timeouts (counter).
pub const HEARTBEAT_EVICTIONS_TOTAL: &str = "heartbeat_evictions_total";
/// Connections evicted for outbound queue overflow (counter).
pub const BACKPRESSURE_EVICTIONS_TOTAL: &str = "backpressure_evictions_total";
/// Unparseable inbound frames total (counter).
pub const PROTOCOL_ERRORS_TOTAL: &str = "protocol_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // Build a recorder + handle without the global install so tests
        // cannot conflict.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n') || output.contains('#'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            AUTH_FAILURES_TOTAL,
            SUBSCRIPTIONS_TOTAL,
            MESSAGES_CREATED_TOTAL,
            REACTIONS_TOGGLED_TOTAL,
            EVENTS_DISPATCHED_TOTAL,
            HEARTBEAT_EVICTIONS_TOTAL,
            BACKPRESSURE_EVICTIONS_TOTAL,
            PROTOCOL_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
