//! Worker metrics and the Prometheus exporter.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use reel_models::BackgroundOutcome;

use crate::error::{WorkerError, WorkerResult};

pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "reel_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "reel_jobs_failed_total";
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "reel_jobs_dead_lettered_total";
    pub const JOB_DURATION_SECONDS: &str = "reel_job_duration_seconds";
    pub const JOBS_IN_FLIGHT: &str = "reel_jobs_in_flight";
    pub const BACKGROUND_OUTCOMES_TOTAL: &str = "reel_background_outcomes_total";
    pub const SOURCE_DOWNLOADS_TOTAL: &str = "reel_source_downloads_total";
}

/// Serve `/metrics` on `addr` for the lifetime of the process.
pub fn install_exporter(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
    info!(addr = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "success").record(duration_secs);
}

pub fn record_job_failed(retryable: bool, duration_secs: f64) {
    let retryable = if retryable { "true" } else { "false" };
    counter!(names::JOBS_FAILED_TOTAL, "retryable" => retryable).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration_secs);
}

pub fn record_dead_lettered() {
    counter!(names::JOBS_DEAD_LETTERED_TOTAL).increment(1);
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}

pub fn record_background(outcome: BackgroundOutcome) {
    let outcome = match outcome {
        BackgroundOutcome::Segments => "segments",
        BackgroundOutcome::StaticFallback => "static_fallback",
    };
    counter!(names::BACKGROUND_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_source_download(success: bool) {
    let status = if success { "ok" } else { "failed" };
    counter!(names::SOURCE_DOWNLOADS_TOTAL, "status" => status).increment(1);
}
