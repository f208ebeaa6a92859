//! Prometheus metrics for the worker, scheduler and warmers
//!
//! This module provides metrics tracking for:
//! - Scheduler: interval decisions, queue depth, jobs processed by hook
//! - Warmers: URLs warmed by source and outcome, chunk jobs created, remote
//!   request duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    schedule_decisions: CounterVec,
    jobs_processed: CounterVec,
    job_duration: HistogramVec,
    pending_jobs: Gauge,
}

/// Container for all warmer metrics
struct WarmerMetrics {
    urls_warmed: CounterVec,
    chunks_created: Counter,
    remote_requests: CounterVec,
    remote_duration: HistogramVec,
}

/// Global storage for scheduler metrics
static SCHEDULER_METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Global storage for warmer metrics
static WARMER_METRICS: OnceLock<WarmerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = prewarm::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let scheduler = SchedulerMetrics {
        schedule_decisions: register_counter_vec!(
            "prewarm_schedule_decisions_total",
            "Interval scheduling decisions by hook and decision",
            &["hook", "decision"]
        )?,
        jobs_processed: register_counter_vec!(
            "prewarm_jobs_processed_total",
            "Queue jobs processed by hook and outcome",
            &["hook", "outcome"]
        )?,
        job_duration: register_histogram_vec!(
            "prewarm_job_duration_seconds",
            "Time spent handling a queue job in seconds",
            &["hook"],
            vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
        )?,
        pending_jobs: register_gauge!(
            "prewarm_pending_jobs",
            "Number of pending jobs in the queue"
        )?,
    };

    let warmer = WarmerMetrics {
        urls_warmed: register_counter_vec!(
            "prewarm_urls_warmed_total",
            "URLs warmed by source (local, external) and outcome",
            &["source", "outcome"]
        )?,
        chunks_created: register_counter!(
            "prewarm_chunks_created_total",
            "Total warm chunk jobs enqueued"
        )?,
        remote_requests: register_counter_vec!(
            "prewarm_remote_requests_total",
            "Requests sent to remote warmer servers by server and status",
            &["server", "status"]
        )?,
        remote_duration: register_histogram_vec!(
            "prewarm_remote_request_duration_seconds",
            "Remote warmer request duration in seconds",
            &["server"],
            vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0]
        )?,
    };

    SCHEDULER_METRICS
        .set(scheduler)
        .map_err(|_| "Scheduler metrics already initialized")?;
    WARMER_METRICS
        .set(warmer)
        .map_err(|_| "Warmer metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    SCHEDULER_METRICS.get().is_some() && WARMER_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome of an `ensure_scheduled` call
pub fn record_schedule_decision(hook: &str, decision: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.schedule_decisions
            .with_label_values(&[hook, decision])
            .inc();
    }
}

/// Record a processed queue job
pub fn record_job(hook: &str, outcome: &str) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.jobs_processed.with_label_values(&[hook, outcome]).inc();
    }
}

/// Update the pending queue depth
pub fn update_pending_jobs(pending: usize) {
    if let Some(m) = SCHEDULER_METRICS.get() {
        m.pending_jobs.set(pending as f64);
    }
}

/// Record warmed URLs for a source
pub fn record_urls_warmed(source: &str, success: u64, failed: u64) {
    let Some(m) = WARMER_METRICS.get() else {
        return;
    };

    if success > 0 {
        m.urls_warmed
            .with_label_values(&[source, "success"])
            .inc_by(success as f64);
    }
    if failed > 0 {
        m.urls_warmed
            .with_label_values(&[source, "failed"])
            .inc_by(failed as f64);
    }
}

/// Record enqueued chunk jobs
pub fn record_chunks_created(count: usize) {
    if let Some(m) = WARMER_METRICS.get() {
        m.chunks_created.inc_by(count as f64);
    }
}

/// Record a request to a remote warmer server
pub fn record_remote_request(server: &str, status: Option<u16>, duration_secs: f64) {
    let Some(m) = WARMER_METRICS.get() else {
        return;
    };

    let status_str = status.map_or_else(|| "error".to_string(), |s| s.to_string());
    m.remote_requests
        .with_label_values(&[server, status_str.as_str()])
        .inc();
    m.remote_duration
        .with_label_values(&[server])
        .observe(duration_secs);
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a job timer (returns a timer handle)
pub fn start_job_timer(hook: &str) -> MetricsTimer {
    match SCHEDULER_METRICS.get() {
        Some(m) => MetricsTimer::new(m.job_duration.with_label_values(&[hook]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        ensure_metrics_initialized();
        record_chunks_created(3);
        let text = encode_metrics().unwrap();
        assert!(text.contains("prewarm_") || text.is_empty());
    }

    #[test]
    fn test_recording_does_not_panic() {
        ensure_metrics_initialized();
        record_schedule_decision("local_warm_interval", "scheduled");
        record_job("warm_urls_chunk", "complete");
        update_pending_jobs(4);
        record_urls_warmed("external", 9, 1);
        record_remote_request("us1", Some(200), 0.8);
        record_remote_request("us2", None, 30.0);
        let _timer = start_job_timer("warm_urls_chunk");
    }
}
