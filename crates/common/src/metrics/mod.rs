//! Metrics and observability utilities
//!
//! Prometheus-style metrics for outbound calls, batch scheduling,
//! ingestion, and retrieval, with standardized naming.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all RagForge metrics
pub const METRICS_PREFIX: &str = "ragforge";

/// Histogram buckets for outbound service latency (in seconds).
/// Embedding and generation calls are slow; vector search is fast.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00, 30.00, 60.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Outbound HTTP
    describe_counter!(
        format!("{}_http_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Outbound service calls by endpoint and outcome"
    );

    describe_histogram!(
        format!("{}_http_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Outbound call latency including retries"
    );

    describe_counter!(
        format!("{}_http_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Retried outbound attempts"
    );

    // Scheduling
    describe_counter!(
        format!("{}_batches_dispatched_total", METRICS_PREFIX),
        Unit::Count,
        "Batches handed to workers"
    );

    describe_counter!(
        format!("{}_batch_items_total", METRICS_PREFIX),
        Unit::Count,
        "Scheduled items by stage and status"
    );

    // Ingestion
    describe_counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks created"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Ingestion job latency in seconds"
    );

    describe_counter!(
        format!("{}_ingestion_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Failed ingestion items by stage"
    );

    // Retrieval
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total fused searches"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Fused search latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of chunks returned from the last fused search"
    );

    describe_counter!(
        format!("{}_query_expansion_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Query expansions that fell back to the verbatim query"
    );

    tracing::info!("Metrics registered");
}

/// Times one outbound call from first attempt to final outcome
pub struct CallTimer {
    start: Instant,
    endpoint: String,
}

impl CallTimer {
    pub fn start(endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Record the call's outcome and latency
    pub fn finish(self, outcome: &str) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_http_requests_total", METRICS_PREFIX),
            "endpoint" => self.endpoint.clone(),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_http_request_duration_seconds", METRICS_PREFIX),
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_retry(endpoint: &str) {
    counter!(
        format!("{}_http_retries_total", METRICS_PREFIX),
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

pub fn record_batch_dispatched(stage: &str) {
    counter!(
        format!("{}_batches_dispatched_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(1);
}

/// Helper to record per-item scheduling outcomes
pub fn record_batch_items(stage: &str, succeeded: usize, failed: usize) {
    counter!(
        format!("{}_batch_items_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "status" => "success"
    )
    .increment(succeeded as u64);

    counter!(
        format!("{}_batch_items_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "status" => "error"
    )
    .increment(failed as u64);
}

/// Helper to record ingestion metrics
pub fn record_ingestion(duration_secs: f64, chunks_created: usize) {
    counter!(format!("{}_chunks_created_total", METRICS_PREFIX)).increment(chunks_created as u64);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

pub fn record_ingestion_failures(stage: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        format!("{}_ingestion_failures_total", METRICS_PREFIX),
        "stage" => stage.to_string()
    )
    .increment(count as u64);
}

/// Helper to record fused search metrics
pub fn record_search(duration_secs: f64, variants: usize, result_count: usize) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "variants" => variants.to_string()
    )
    .increment(1);

    histogram!(format!("{}_search_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    gauge!(format!("{}_search_results_count", METRICS_PREFIX)).set(result_count as f64);
}

pub fn record_expansion_fallback() {
    counter!(format!("{}_query_expansion_fallbacks_total", METRICS_PREFIX)).increment(1);
}
