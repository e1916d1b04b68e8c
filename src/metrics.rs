//! Prometheus metrics, exposed on the API's /metrics endpoint.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Encoder, Gauge,
    Histogram, TextEncoder,
};

lazy_static! {
    /// 1 when the process is serving
    pub static ref UP: Gauge = register_gauge!(
        "shopyard_up",
        "Whether the process is up"
    ).unwrap();

    pub static ref PROVISIONS_TOTAL: CounterVec = register_counter_vec!(
        "shopyard_provisions_total",
        "Provisioning tasks finished, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref DELETIONS_TOTAL: CounterVec = register_counter_vec!(
        "shopyard_deletions_total",
        "Deletion tasks finished, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref TASK_RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "shopyard_task_retries_total",
        "Task attempts that failed and were retried, by task kind",
        &["kind"]
    ).unwrap();

    pub static ref STORES_SUBMITTED_TOTAL: CounterVec = register_counter_vec!(
        "shopyard_stores_submitted_total",
        "Store submissions admitted or rejected by the API",
        &["result"]
    ).unwrap();

    pub static ref HELM_INSTALL_DURATION_SECONDS: Histogram = register_histogram!(
        "shopyard_helm_install_duration_seconds",
        "Wall-clock duration of helm install invocations",
        vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1300.0]
    ).unwrap();
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        UP.set(1.0);
        PROVISIONS_TOTAL.with_label_values(&["ready"]).inc();
        let body = render();
        assert!(body.contains("shopyard_up"));
        assert!(body.contains("shopyard_provisions_total"));
    }
}
