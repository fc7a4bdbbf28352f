//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fanout_cache_requests_total` (counter): lookups by domain and outcome
//! - `fanout_executor_duration_seconds` (histogram): executor latency per domain
//! - `fanout_inflight_requests` (gauge): computations currently shared
//! - `breaker_transitions_total` (counter): state changes by breaker
//! - `breaker_rejections_total` (counter): fast-failed calls by breaker
//! - `registry_instance_health` (gauge): 1=healthy, 0=not healthy
//! - `persistence_writes_total` (counter): background writes by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Prometheus exporter is opt-in from the binary

use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter and describe all metrics.
pub fn init_metrics(addr: SocketAddr) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.with_http_listener(addr).install() {
        tracing::error!(error = %e, "Failed to install Prometheus exporter");
        return;
    }

    metrics::describe_counter!(
        "fanout_cache_requests_total",
        "Fan-out cache lookups by domain and outcome"
    );
    metrics::describe_histogram!(
        "fanout_executor_duration_seconds",
        "Domain executor latency"
    );
    metrics::describe_gauge!(
        "fanout_inflight_requests",
        "Deduplicated computations currently in flight"
    );
    metrics::describe_counter!("breaker_transitions_total", "Circuit breaker state changes");
    metrics::describe_counter!(
        "breaker_rejections_total",
        "Calls refused by an open circuit breaker"
    );
    metrics::describe_gauge!(
        "registry_instance_health",
        "Service instance health (1=healthy)"
    );
    metrics::describe_counter!(
        "persistence_writes_total",
        "Background state writes by outcome"
    );

    tracing::info!(address = %addr, "Metrics exporter listening");
}

/// Record a cache lookup outcome (`hit`, `miss`, `joined`, `degraded`).
pub fn record_cache_lookup(domain: &str, outcome: &'static str) {
    metrics::counter!(
        "fanout_cache_requests_total",
        "domain" => domain.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_executor_duration(domain: &str, elapsed: Duration) {
    metrics::histogram!(
        "fanout_executor_duration_seconds",
        "domain" => domain.to_string()
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_inflight(count: usize) {
    metrics::gauge!("fanout_inflight_requests").set(count as f64);
}

pub fn record_breaker_transition(breaker: &str, from: &'static str, to: &'static str) {
    metrics::counter!(
        "breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(breaker: &str) {
    metrics::counter!("breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_instance_health(service: &str, instance: &str, healthy: bool) {
    metrics::gauge!(
        "registry_instance_health",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_persist_write(outcome: &'static str) {
    metrics::counter!("persistence_writes_total", "outcome" => outcome).increment(1);
}
