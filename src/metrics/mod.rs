//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Upstream request outcomes per service
//! - Batch dispatches and batch sizes per loader
//! - Resolution outcomes per entry point

use crate::error::{ResolveError, ResolveResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref UPSTREAM_REQUESTS: CounterVec = register_counter_vec!(
        "rgbpp_upstream_requests_total",
        "Upstream requests by service and outcome",
        &["service", "outcome"]
    ).expect("metric registers once");

    pub static ref BATCH_DISPATCHES: CounterVec = register_counter_vec!(
        "rgbpp_batch_dispatches_total",
        "Batched upstream calls issued by the coalescer",
        &["loader"]
    ).expect("metric registers once");

    pub static ref BATCH_SIZE: HistogramVec = register_histogram_vec!(
        "rgbpp_batch_size",
        "Distinct keys per dispatched batch",
        &["loader"],
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]
    ).expect("metric registers once");

    pub static ref RESOLUTIONS: CounterVec = register_counter_vec!(
        "rgbpp_resolutions_total",
        "Binding resolutions by entry point and final state",
        &["entry", "state"]
    ).expect("metric registers once");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> ResolveResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ResolveError::Config(format!("cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| ResolveError::Internal(e.to_string()))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_upstream<T>(service: &str, result: &ResolveResult<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    UPSTREAM_REQUESTS
        .with_label_values(&[service, outcome])
        .inc();
}

pub fn record_batch_dispatch(loader: &str, size: usize) {
    BATCH_DISPATCHES.with_label_values(&[loader]).inc();
    BATCH_SIZE.with_label_values(&[loader]).observe(size as f64);
}

pub fn record_resolution(entry: &str, state: &str) {
    RESOLUTIONS.with_label_values(&[entry, state]).inc();
}
