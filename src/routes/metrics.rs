use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        "sync_jobs_submitted_total",
        "Jobs created by batch submission or dead-letter retry"
    );
    metrics::describe_counter!(
        "sync_jobs_completed_total",
        "Jobs completed successfully"
    );
    metrics::describe_counter!(
        "sync_jobs_retried_total",
        "Job failures rescheduled with backoff"
    );
    metrics::describe_counter!(
        "sync_jobs_dead_lettered_total",
        "Jobs moved to the dead-letter store"
    );
    metrics::describe_counter!(
        "sync_leases_reclaimed_total",
        "Expired leases returned to pending"
    );
    metrics::describe_counter!(
        "sync_circuit_transitions_total",
        "Circuit breaker state changes"
    );
    metrics::describe_histogram!(
        "sync_job_duration_seconds",
        "Time spent executing one claimed job"
    );
}

/// Prometheus scrape endpoint, text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
