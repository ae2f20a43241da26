//! Prometheus metrics registration and export.
//!
//! Metrics are optional: recording helpers are no-ops until
//! [`init_metrics`] has run, so library users who do not scrape
//! Prometheus pay nothing. The scheduler updates the gauges on every
//! state change and records an outcome counter and duration histogram
//! when a job reaches a terminal state.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all genqueue metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Number of jobs waiting in the admission queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Number of jobs currently executing.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Current concurrency ceiling.
pub static CONCURRENCY_CEILING: OnceLock<Gauge> = OnceLock::new();

/// Terminal job outcomes, labeled by status and kind.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job execution duration in seconds, labeled by kind.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at application startup. Calling again is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let queue_depth = Gauge::new(
        "genqueue_queue_depth",
        "Number of jobs waiting in the admission queue",
    )?;

    let jobs_in_progress = Gauge::new(
        "genqueue_jobs_in_progress",
        "Number of jobs currently executing",
    )?;

    let concurrency_ceiling = Gauge::new(
        "genqueue_concurrency_ceiling",
        "Current concurrency ceiling",
    )?;

    let jobs_total = CounterVec::new(
        Opts::new("genqueue_jobs_total", "Terminal job outcomes"),
        &["status", "kind"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "genqueue_job_duration_seconds",
            "Job execution duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["kind"],
    )?;

    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(concurrency_ceiling.clone()))?;
    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = CONCURRENCY_CEILING.set(concurrency_ceiling);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if metrics were never
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

/// Updates the queue gauges. No-op until metrics are initialized.
pub(crate) fn set_gauges(queue_depth: usize, in_progress: usize, ceiling: usize) {
    if let Some(gauge) = QUEUE_DEPTH.get() {
        gauge.set(queue_depth as f64);
    }
    if let Some(gauge) = JOBS_IN_PROGRESS.get() {
        gauge.set(in_progress as f64);
    }
    if let Some(gauge) = CONCURRENCY_CEILING.get() {
        gauge.set(ceiling as f64);
    }
}

/// Records a terminal job outcome. No-op until metrics are initialized.
pub(crate) fn record_outcome(status: &str, kind: &str, duration_secs: f64) {
    if let Some(counter) = JOBS_TOTAL.get() {
        counter.with_label_values(&[status, kind]).inc();
    }
    if let Some(histogram) = JOB_DURATION.get() {
        histogram.with_label_values(&[kind]).observe(duration_secs);
    }
}
