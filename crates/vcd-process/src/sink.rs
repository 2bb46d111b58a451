//! Status sinks receive output lines, progress and the final outcome.

use tracing::{error, info};

/// Receiver for everything a stage or a pipeline run reports.
///
/// Implementations are called from background tasks and must not block.
pub trait StatusSink: Send + Sync {
    /// One line of tool output or a log line produced by the engine.
    fn on_output_line(&self, line: &str);

    /// `fraction` is in `[0, 1]`.
    fn on_progress(&self, phase: &str, fraction: f64);

    /// Called once when a run ends.
    fn on_terminal(&self, success: bool, detail: Option<&str>);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl StatusSink for NoopSink {
    fn on_output_line(&self, _line: &str) {}

    fn on_progress(&self, _phase: &str, _fraction: f64) {}

    fn on_terminal(&self, _success: bool, _detail: Option<&str>) {}
}

/// Forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn on_output_line(&self, line: &str) {
        info!(target: "vcd::output", "{}", line);
    }

    fn on_progress(&self, phase: &str, fraction: f64) {
        info!(phase = %phase, progress = %format!("{:.1}%", fraction * 100.0), "Progress");
    }

    fn on_terminal(&self, success: bool, detail: Option<&str>) {
        if success {
            info!("Run finished");
        } else {
            error!(detail = detail.unwrap_or("unknown error"), "Run failed");
        }
    }
}
