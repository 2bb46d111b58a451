//! Structured run logging and subscriber setup.

use std::time::Duration;

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vcd_models::{DetectedCopy, MediaDatabase};
use vcd_process::metrics::record_pipeline_run;

use crate::error::EngineResult;

/// Milestones of one detection run, logged inside its `detection_run` span.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
    references: usize,
}

impl RunLogger {
    pub fn new(run_id: &str, references: usize) -> Self {
        Self {
            run_id: run_id.to_string(),
            references,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn span(&self) -> Span {
        tracing::info_span!(
            "detection_run",
            run_id = %self.run_id,
            references = self.references
        )
    }

    pub fn started(&self, query: &str) {
        info!(query, references = self.references, "Detection started");
    }

    pub fn query_ready(&self, query: &MediaDatabase) {
        info!(
            query_db = %query.name(),
            objects = query.len(),
            "Query database ready"
        );
    }

    pub fn reference_done(&self, reference: &MediaDatabase, detections: usize) {
        info!(reference = %reference.name(), detections, "Reference searched");
    }

    /// Log the outcome and record it in the run metrics.
    pub fn finished(&self, result: &EngineResult<Vec<DetectedCopy>>, elapsed: Duration) {
        let status = run_status(result);
        record_pipeline_run(status, elapsed);
        let elapsed_ms = elapsed.as_millis() as u64;
        match result {
            Ok(detections) => info!(detections = detections.len(), elapsed_ms, "Detection finished"),
            Err(_) if status == "cancelled" => warn!(elapsed_ms, "Detection cancelled"),
            Err(e) => error!(kind = ?e.kind(), elapsed_ms, error = %e, "Detection failed"),
        }
    }
}

/// Metrics label for a run outcome.
pub fn run_status(result: &EngineResult<Vec<DetectedCopy>>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.is_cancelled() => "cancelled",
        Err(_) => "failed",
    }
}

/// Install the global subscriber: JSON when `LOG_FORMAT=json`, ANSI text otherwise.
///
/// `RUST_LOG` directives are honored on top of the `vcd=info` default.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vcd=info", "vcd_engine=info", "vcd_process=info"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_run_status_labels() {
        assert_eq!(run_status(&Ok(Vec::new())), "ok");
        assert_eq!(run_status(&Err(EngineError::Cancelled)), "cancelled");
        assert_eq!(run_status(&Err(EngineError::not_found("detections.txt"))), "failed");
    }

    #[test]
    fn test_finished_without_subscriber() {
        let logger = RunLogger::new("run-123", 2);
        assert_eq!(logger.run_id(), "run-123");
        logger.finished(&Err(EngineError::Cancelled), Duration::from_millis(5));
    }
}
