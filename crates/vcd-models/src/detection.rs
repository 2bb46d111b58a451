//! Detected copies: matching segment pairs between a query and a reference.

use std::sync::Arc;

use serde::Serialize;

use crate::media::MediaObject;
use crate::timecode::format_mmss;

/// One claimed copy of a query segment inside a reference object.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedCopy {
    score: f64,
    from_q: f64,
    to_q: f64,
    from_r: f64,
    to_r: f64,
    query: Arc<MediaObject>,
    reference: Arc<MediaObject>,
}

impl DetectedCopy {
    /// Segment bounds are in seconds.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        score: f64,
        query: Arc<MediaObject>,
        from_q: f64,
        to_q: f64,
        reference: Arc<MediaObject>,
        from_r: f64,
        to_r: f64,
    ) -> Self {
        Self {
            score,
            from_q,
            to_q,
            from_r,
            to_r,
            query,
            reference,
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn query(&self) -> &Arc<MediaObject> {
        &self.query
    }

    pub fn reference(&self) -> &Arc<MediaObject> {
        &self.reference
    }

    /// Query segment `[from, to]` in seconds.
    pub fn query_segment(&self) -> (f64, f64) {
        (self.from_q, self.to_q)
    }

    /// Reference segment `[from, to]` in seconds.
    pub fn reference_segment(&self) -> (f64, f64) {
        (self.from_r, self.to_r)
    }

    /// Length of the longer of the two segments.
    pub fn length_secs(&self) -> f64 {
        (self.to_q - self.from_q).max(self.to_r - self.from_r)
    }

    pub fn length_text(&self) -> String {
        format_mmss(self.length_secs())
    }

    pub fn query_from_text(&self) -> String {
        format_mmss(self.from_q)
    }

    pub fn query_to_text(&self) -> String {
        format_mmss(self.to_q)
    }

    pub fn reference_from_text(&self) -> String {
        format_mmss(self.from_r)
    }

    pub fn reference_to_text(&self) -> String {
        format_mmss(self.to_r)
    }
}
