use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// # Errors
///
/// Returns an error if the recorder cannot be installed or binding the
/// metrics HTTP server fails.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health check handler - returns 200 if server is running.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Link gauges.
pub mod gauges {
    /// 1 while the command source answers, 0 otherwise.
    pub fn set_link_connected(connected: bool) {
        metrics::gauge!("tank_link_connected").set(if connected { 1.0 } else { 0.0 });
    }
}

/// Event counters.
pub mod counters {
    /// Record a frame handed to the radio, labelled by command.
    pub fn frames_sent(command: &'static str) {
        metrics::counter!("tank_frames_sent_total", "command" => command).increment(1);
    }

    /// Record a tick on which the watchdog sent nothing.
    pub fn frames_suppressed(reason: &'static str) {
        metrics::counter!("tank_frames_suppressed_total", "reason" => reason).increment(1);
    }

    /// Increment the radio failure counter.
    pub fn radio_failures() {
        metrics::counter!("tank_radio_failures_total").increment(1);
    }

    /// Increment the encode failure counter.
    pub fn encode_failures() {
        metrics::counter!("tank_encode_failures_total").increment(1);
    }

    /// Record a failed poll, labelled `unreachable` or `invalid_payload`.
    pub fn source_faults(kind: &'static str) {
        metrics::counter!("tank_source_faults_total", "kind" => kind).increment(1);
    }
}
