//! Metrics collection and exposition.
//!
//! # Metrics
//! - `lb_http_requests_total` (counter): requests by method, code
//! - `lb_request_duration_seconds` (histogram): latency by method, code
//! - `lb_rate_limited_requests_total` (counter): rejected by the rate limiter
//! - `lb_backend_latency_ewma_ms` (gauge): per-backend latency EWMA
//! - `lb_backend_circuit_state` (gauge): 0=closed, 1=open, 2=half_open
//! - `lb_backends_alive` (gauge): backends currently marked alive
//!
//! The dispatch path only sees the [`MetricsSink`] trait. Recording never
//! fails and never changes a dispatch outcome.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Observations emitted by the dispatch engine.
pub trait MetricsSink: Send + Sync {
    fn record_request(&self, method: &str, status: u16, duration: Duration);
    fn rate_limited(&self);
    fn backend_latency(&self, backend: &str, ewma_ms: f64);
    fn circuit_state(&self, backend: &str, state: CircuitState);
    fn alive_backends(&self, count: usize);
}

/// Sink backed by the global `metrics` recorder (Prometheus in production).
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record_request(&self, method: &str, status: u16, duration: Duration) {
        let code = status.to_string();
        counter!("lb_http_requests_total",
            "method" => method.to_string(),
            "code" => code.clone()
        )
        .increment(1);
        histogram!("lb_request_duration_seconds",
            "method" => method.to_string(),
            "code" => code
        )
        .record(duration.as_secs_f64());
    }

    fn rate_limited(&self) {
        counter!("lb_rate_limited_requests_total").increment(1);
    }

    fn backend_latency(&self, backend: &str, ewma_ms: f64) {
        gauge!("lb_backend_latency_ewma_ms", "backend" => backend.to_string()).set(ewma_ms);
    }

    fn circuit_state(&self, backend: &str, state: CircuitState) {
        gauge!("lb_backend_circuit_state", "backend" => backend.to_string())
            .set(f64::from(state.as_u8()));
    }

    fn alive_backends(&self, count: usize) {
        gauge!("lb_backends_alive").set(count as f64);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_request(&self, _method: &str, _status: u16, _duration: Duration) {}
    fn rate_limited(&self) {}
    fn backend_latency(&self, _backend: &str, _ewma_ms: f64) {}
    fn circuit_state(&self, _backend: &str, _state: CircuitState) {}
    fn alive_backends(&self, _count: usize) {}
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("lb_http_requests_total", "Total number of HTTP requests processed by the load balancer");
    describe_histogram!(
        "lb_request_duration_seconds",
        metrics::Unit::Seconds,
        "Histogram of response time for load balancer"
    );
    describe_counter!("lb_rate_limited_requests_total", "Total number of rate limited requests");
    describe_gauge!("lb_backend_latency_ewma_ms", "EWMA latency per backend in milliseconds");
    describe_gauge!("lb_backend_circuit_state", "Circuit breaker state per backend");
    describe_gauge!("lb_backends_alive", "Current number of healthy backends");
}

/// Install the Prometheus exporter with its own HTTP listener on `addr`.
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
