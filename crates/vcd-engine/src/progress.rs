//! Step-based progress accounting for a detection run.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;
use vcd_models::format_hhmmss;
use vcd_process::StatusSink;

/// Steps that do not depend on the reference count: query database creation
/// plus the query segmentation and descriptor steps.
pub const FIXED_STEPS: usize = 3;

/// Steps per reference database: segment, describe, search, merge, localize.
/// The merge step is counted even when the search needs no merge.
pub const STEPS_PER_REFERENCE: usize = 5;

/// Reports `(phase, completed / total)` before each step.
pub struct ProgressTracker {
    sink: Arc<dyn StatusSink>,
    total: usize,
    completed: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn StatusSink>, reference_count: usize) -> Self {
        Self {
            sink,
            total: total_steps(reference_count),
            completed: 0,
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn fraction(&self) -> f64 {
        self.completed as f64 / self.total as f64
    }

    /// Announce the next step, then count it as done.
    pub fn step(&mut self, phase: &str) {
        debug!(phase, step = self.completed + 1, total = self.total, "Pipeline step");
        self.sink.on_progress(phase, self.fraction());
        self.completed = (self.completed + 1).min(self.total);
    }

    /// Count a reserved step that has nothing to run.
    pub fn skip(&mut self) {
        self.completed = (self.completed + 1).min(self.total);
    }

    /// Final report at 1.0.
    pub fn finish(&mut self) {
        self.completed = self.total;
        let phase = format!(
            "Finished OK. Total time: {}",
            format_hhmmss(self.started.elapsed().as_secs_f64())
        );
        self.sink.on_progress(&phase, 1.0);
    }
}

pub fn total_steps(reference_count: usize) -> usize {
    FIXED_STEPS + STEPS_PER_REFERENCE * reference_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Fractions(Mutex<Vec<(String, f64)>>);

    impl StatusSink for Fractions {
        fn on_output_line(&self, _line: &str) {}

        fn on_progress(&self, phase: &str, fraction: f64) {
            self.0.lock().unwrap().push((phase.to_string(), fraction));
        }

        fn on_terminal(&self, _success: bool, _detail: Option<&str>) {}
    }

    #[test]
    fn test_total_steps() {
        assert_eq!(total_steps(0), 3);
        assert_eq!(total_steps(1), 8);
        assert_eq!(total_steps(3), 18);
    }

    #[test]
    fn test_fraction_reported_before_step() {
        let sink = Arc::new(Fractions::default());
        let mut tracker = ProgressTracker::new(sink.clone(), 1);
        tracker.step("Creating Query Database");
        tracker.step("Segmenting");
        tracker.skip();

        let reports = sink.0.lock().unwrap().clone();
        assert_eq!(reports[0], ("Creating Query Database".to_string(), 0.0));
        assert_eq!(reports[1].1, 1.0 / 8.0);
        assert_eq!(tracker.completed(), 3);
    }

    #[test]
    fn test_finish_reports_one() {
        let sink = Arc::new(Fractions::default());
        let mut tracker = ProgressTracker::new(sink.clone(), 2);
        for _ in 0..tracker.total() {
            tracker.step("work");
        }
        tracker.finish();

        let reports = sink.0.lock().unwrap().clone();
        let fractions: Vec<f64> = reports.iter().map(|(_, f)| *f).collect();
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fractions.iter().filter(|f| **f == 1.0).count(), 1);
        let (phase, last) = reports.last().unwrap();
        assert_eq!(*last, 1.0);
        assert!(phase.starts_with("Finished OK. Total time: 00:00:0"));
    }
}
