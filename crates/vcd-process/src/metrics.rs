//! Stage metrics, emitted through the `metrics` facade.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_RUNS_TOTAL: &str = "vcd_stage_runs_total";
    pub const STAGE_DURATION_SECONDS: &str = "vcd_stage_duration_seconds";
    pub const PIPELINE_RUNS_TOTAL: &str = "vcd_pipeline_runs_total";
    pub const PIPELINE_DURATION_SECONDS: &str = "vcd_pipeline_duration_seconds";
}

/// Record one finished stage. `status` is `ok`, `failed`, `cancelled` or `spawn_error`.
pub fn record_stage(tool: &str, status: &str, elapsed: Duration) {
    let labels = [("tool", tool.to_string()), ("status", status.to_string())];
    counter!(names::STAGE_RUNS_TOTAL, &labels).increment(1);

    let labels = [("tool", tool.to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(elapsed.as_secs_f64());
}

/// Record one finished pipeline run.
pub fn record_pipeline_run(status: &str, elapsed: Duration) {
    let labels = [("status", status.to_string())];
    counter!(names::PIPELINE_RUNS_TOTAL, &labels).increment(1);
    histogram!(names::PIPELINE_DURATION_SECONDS).record(elapsed.as_secs_f64());
}
