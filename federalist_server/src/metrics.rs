//! Prometheus metrics.

use metrics::{counter, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("federalist_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a rejected webhook delivery.
pub fn webhook_rejected(reason: &'static str) {
    counter!("federalist_webhooks_rejected_total", "reason" => reason).increment(1);
}

/// Record a build state transition.
pub fn build_state_changed(state: &str) {
    counter!("federalist_builds_total", "state" => state.to_string()).increment(1);
}

/// Record a push that refreshed an already pending build instead of creating one.
pub fn build_deduplicated() {
    counter!("federalist_builds_deduplicated_total").increment(1);
}

/// Record a downstream notification that failed after all retries.
pub fn notification_failed(kind: &'static str) {
    counter!("federalist_notification_failures_total", "kind" => kind).increment(1);
}

/// Record objects removed from a site bucket.
pub fn s3_objects_deleted(count: usize) {
    counter!("federalist_s3_objects_deleted_total").increment(count as u64);
}

/// Record how long a background job took.
pub fn job_duration(job: &'static str, duration_ms: u64) {
    histogram!("federalist_job_duration_ms", "job" => job).record(duration_ms as f64);
}
