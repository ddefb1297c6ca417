//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_captures_total` (counter): captured calls by protocol, mode
//! - `bridge_pass_through_total` (counter): calls no binding accepted, by port
//! - `bridge_parse_errors_total` (counter): bodies that failed to decode
//! - `bridge_downstream_requests_total` (counter): proxy legs by outcome
//! - `bridge_downstream_duration_seconds` (histogram): proxy leg latency
//! - `bridge_active_listeners` (gauge): pooled port listeners alive
//!
//! Recording is a no-op until a recorder is installed, so library users
//! that never call [`init_metrics`] pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::{Mode, Protocol};

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    let handle = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics recorder");
            return;
        }
    };
    tokio::spawn(async move {
        if let Err(e) = serve_metrics(handle, addr).await {
            tracing::error!(address = %addr, error = %e, "Metrics endpoint failed");
        }
    });
    tracing::info!(address = %addr, "Metrics endpoint listening");
}

/// `GET /metrics` in the Prometheus text format.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

pub fn record_capture(protocol: Protocol, mode: Mode) {
    ::metrics::counter!(
        "bridge_captures_total",
        "protocol" => protocol.to_string(),
        "mode" => mode.to_string()
    )
    .increment(1);
}

pub fn record_pass_through(port: u16) {
    ::metrics::counter!("bridge_pass_through_total", "port" => port.to_string()).increment(1);
}

pub fn record_parse_error(protocol: Protocol) {
    ::metrics::counter!("bridge_parse_errors_total", "protocol" => protocol.to_string()).increment(1);
}

pub fn record_downstream(outcome: &'static str, started: Instant) {
    ::metrics::counter!("bridge_downstream_requests_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("bridge_downstream_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn set_active_listeners(count: usize) {
    ::metrics::gauge!("bridge_active_listeners").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_metrics_endpoint_renders_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || record_pass_through(8080));

        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|spare| spare.local_addr())
            .unwrap();
        tokio::spawn(serve_metrics(handle, addr));

        let url = format!("http://{}/metrics", addr);
        let mut body = String::new();
        for _ in 0..50 {
            if let Ok(response) = reqwest::get(&url).await {
                body = response.text().await.unwrap();
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(body.contains(r#"bridge_pass_through_total{port="8080"} 1"#), "{}", body);
    }
}
