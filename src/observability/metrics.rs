//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hmvc_dispatch_total` (counter): dispatches by outcome and error kind
//! - `hmvc_dispatch_duration_seconds` (histogram): dispatch latency
//! - `hmvc_route_cache_total` (counter): cache hit/miss/store/error
//! - `hmvc_routes_registered` (gauge): size of the active route table

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);

    if let Err(e) = builder.install() {
        tracing::error!("Failed to install Prometheus recorder: {}", e);
    } else {
        tracing::info!(address = %addr, "Metrics exporter listening");
    }
}

/// Record one finished dispatch.
pub fn record_dispatch(outcome: &'static str, kind: &'static str, start: Instant) {
    counter!("hmvc_dispatch_total", "outcome" => outcome, "kind" => kind).increment(1);
    histogram!("hmvc_dispatch_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// Record a route cache event.
pub fn record_route_cache(result: &'static str) {
    counter!("hmvc_route_cache_total", "result" => result).increment(1);
}

/// Record the number of routes in the active table.
pub fn record_routes_registered(count: usize) {
    gauge!("hmvc_routes_registered").set(count as f64);
}
