//! Prometheus metrics for invoicing-service.
//!
//! Domain counters live in the default `prometheus` registry. HTTP request
//! metrics recorded through the `metrics` facade (see
//! `service_core::middleware::metrics`) are rendered by the exporter handle;
//! `/metrics` serves both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter, TextEncoder,
};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Invoices created, by creation path.
pub static INVOICES_CREATED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_invoices_created_total",
        "Total number of invoices created",
        &["source"] // quick, full
    )
    .expect("Failed to register invoices_created_total")
});

/// Status transitions by axis and target state.
pub static STATUS_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_status_transitions_total",
        "Total number of invoice status transitions",
        &["axis", "to"]
    )
    .expect("Failed to register status_transitions_total")
});

/// Notifications by kind and outcome.
pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_notifications_total",
        "Total number of notifications by kind and outcome",
        &["kind", "outcome"] // sent, failed, skipped, dropped
    )
    .expect("Failed to register notifications_total")
});

/// Scheduled scan runs.
pub static SCAN_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "invoicing_scan_runs_total",
        "Total number of scheduled scan runs",
        &["scan"]
    )
    .expect("Failed to register scan_runs_total")
});

/// Realtime publish failures.
pub static REALTIME_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "invoicing_realtime_failures_total",
        "Total number of failed realtime publishes"
    )
    .expect("Failed to register realtime_failures_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "invoicing_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics. Safe to call more than once.
pub fn init_metrics() {
    METRICS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    });

    Lazy::force(&INVOICES_CREATED_TOTAL);
    Lazy::force(&STATUS_TRANSITIONS_TOTAL);
    Lazy::force(&NOTIFICATIONS_TOTAL);
    Lazy::force(&SCAN_RUNS_TOTAL);
    Lazy::force(&REALTIME_FAILURES_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .and_then(|handle| handle.as_ref())
        .map(|handle| handle.render())
        .unwrap_or_default();

    let encoder = TextEncoder::new();
    if let Ok(domain) = encoder.encode_to_string(&prometheus::gather()) {
        output.push_str(&domain);
    }
    output
}

pub fn record_notification(kind: &str, outcome: &str) {
    NOTIFICATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
}
