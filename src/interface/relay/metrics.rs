//! Prometheus metrics endpoint

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe our metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!("peercall_calls_started_total", "Calls proposed locally");
    describe_counter!("peercall_calls_accepted_total", "Incoming calls accepted");
    describe_counter!("peercall_calls_connected_total", "Calls that reached active");
    describe_counter!("peercall_calls_ended_total", "Calls ended, by reason");
    describe_counter!(
        "peercall_busy_rejects_total",
        "Offers rejected because a call was already in progress"
    );
    describe_counter!(
        "peercall_signaling_sent_total",
        "Signaling messages published, by type"
    );
    describe_counter!(
        "peercall_signaling_send_failures_total",
        "Signaling messages that could not be published"
    );
    describe_counter!(
        "peercall_relay_forwarded_total",
        "Frames re-broadcast by the relay, by type"
    );
    describe_counter!(
        "peercall_relay_rejected_total",
        "Frames dropped by the relay because they did not parse"
    );
    describe_gauge!(
        "peercall_relay_connections",
        "Open websocket connections on the relay"
    );

    Ok(handle)
}

pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, handle.render()).into_response()
}
