//! Metrics and observability utilities
//!
//! Prometheus-style metrics for the HTTP gateway and the batch tools.
//! The gateway serves them over HTTP; the admin tools install an in-process
//! recorder and dump it to a text file on exit.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all MedDesk metrics
pub const METRICS_PREFIX: &str = "meddesk";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_histogram!(
        format!("{}_pipeline_step_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Duration of one report pipeline step"
    );

    describe_counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Report pipeline runs by outcome"
    );

    describe_counter!(
        format!("{}_backups_total", METRICS_PREFIX),
        Unit::Count,
        "Backup and restore operations by outcome"
    );

    describe_gauge!(
        format!("{}_backup_size_bytes", METRICS_PREFIX),
        Unit::Bytes,
        "Size of the most recent backup archive"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one pipeline step
pub fn record_pipeline_step(pipeline: &str, step: &str, duration_secs: f64) {
    histogram!(
        format!("{}_pipeline_step_duration_seconds", METRICS_PREFIX),
        "pipeline" => pipeline.to_string(),
        "step" => step.to_string()
    )
    .record(duration_secs);
}

/// Record a finished pipeline run
pub fn record_pipeline_run(pipeline: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        "pipeline" => pipeline.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a backup or restore outcome
pub fn record_backup(operation: &str, success: bool, archive_bytes: Option<u64>) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_backups_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if let Some(bytes) = archive_bytes {
        gauge!(format!("{}_backup_size_bytes", METRICS_PREFIX)).set(bytes as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        let metrics = RequestMetrics::start("GET", "/api/patients");
        metrics.finish(200);
        record_pipeline_step("analysis", "overview", 0.01);
        record_pipeline_run("analysis", true);
        record_backup("create", false, None);
    }
}
