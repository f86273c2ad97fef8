//! Media pipeline metrics.
//!
//! Recorded through the `metrics` facade; a no-op unless the host process
//! installs a recorder.

use metrics::{counter, histogram};

use crate::compose::LabelFallback;

// =============================================================================
// Metric Names
// =============================================================================

pub mod names {
    /// Compositions by outcome (`success`, `invalid`, `failed`).
    pub const COMPOSITIONS_TOTAL: &str = "reel_compositions_total";
    /// End-to-end composition time.
    pub const COMPOSITION_DURATION_SECONDS: &str = "reel_composition_duration_seconds";
    /// Encoder process runtime by outcome.
    pub const ENCODER_DURATION_SECONDS: &str = "reel_encoder_duration_seconds";
    /// Encoder runs by outcome (`ok`, `failed`, `no_output`).
    pub const ENCODER_RUNS_TOTAL: &str = "reel_encoder_runs_total";
    /// Segment extractions that failed.
    pub const SEGMENT_FAILURES_TOTAL: &str = "reel_segment_failures_total";
    /// Output label fallbacks by kind.
    pub const LABEL_FALLBACKS_TOTAL: &str = "reel_label_fallbacks_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

pub fn record_composition(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::COMPOSITIONS_TOTAL, &labels).increment(1);
    histogram!(names::COMPOSITION_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_encoder_run(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::ENCODER_RUNS_TOTAL, &labels).increment(1);
    histogram!(names::ENCODER_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_segment_failure(category: &str) {
    counter!(
        names::SEGMENT_FAILURES_TOTAL,
        "category" => category.to_string()
    )
    .increment(1);
}

pub fn record_label_fallback(fallback: LabelFallback) {
    let kind = match fallback {
        LabelFallback::LastText => "last_text",
        LabelFallback::LastImage => "last_image",
        LabelFallback::Base => "base",
    };
    counter!(names::LABEL_FALLBACKS_TOTAL, "fallback" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::COMPOSITIONS_TOTAL.starts_with("reel_"));
        assert!(names::ENCODER_DURATION_SECONDS.ends_with("_seconds"));
        assert!(names::SEGMENT_FAILURES_TOTAL.ends_with("_total"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_composition("success", 1.0);
        record_encoder_run("ok", 0.5);
        record_segment_failure("nature");
        record_label_fallback(LabelFallback::Base);
    }
}
