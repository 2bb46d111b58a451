//! Detections file parsing and ranking.
//!
//! Lines starting with `#` are comments. Every other line, blank ones
//! included, must hold seven tab-separated fields:
//! score, query id, query from, query to, reference id, reference from,
//! reference to. Times are timecodes (`H:MM:SS`, `MM:SS` or seconds).

use std::path::Path;

use vcd_models::{parse_timecode, DetectedCopy, MediaDatabase};

use crate::error::{EngineError, EngineResult};

const FIELD_COUNT: usize = 7;

/// Parse detections produced for `query_db` against `reference_db`.
///
/// Any malformed line, or an object id unknown to its database, fails the
/// whole file. `path` is only used in error messages.
pub fn parse_detections(
    content: &str,
    path: &Path,
    query_db: &MediaDatabase,
    reference_db: &MediaDatabase,
) -> EngineResult<Vec<DetectedCopy>> {
    let mut detections = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim_end_matches('\r');
        if raw.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = raw.split('\t').collect();
        if fields.len() != FIELD_COUNT {
            return Err(EngineError::parse(
                path,
                line,
                format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
            ));
        }

        let score = fields[0]
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|score| score.is_finite())
            .ok_or_else(|| EngineError::parse(path, line, format!("invalid score '{}'", fields[0])))?;
        let query = query_db.get(fields[1]).ok_or_else(|| {
            EngineError::parse(
                path,
                line,
                format!("can't find {} in {}", fields[1], query_db.name()),
            )
        })?;
        let reference = reference_db.get(fields[4]).ok_or_else(|| {
            EngineError::parse(
                path,
                line,
                format!("can't find {} in {}", fields[4], reference_db.name()),
            )
        })?;
        let time = |i: usize| {
            parse_timecode(fields[i]).map_err(|e| EngineError::parse(path, line, e.to_string()))
        };

        detections.push(DetectedCopy::new(
            score,
            query.clone(),
            time(2)?,
            time(3)?,
            reference.clone(),
            time(5)?,
            time(6)?,
        ));
    }

    Ok(detections)
}

/// Read and parse a detections file.
pub async fn read_detections(
    path: &Path,
    query_db: &MediaDatabase,
    reference_db: &MediaDatabase,
) -> EngineResult<Vec<DetectedCopy>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::not_found(format!("detections file {}: {}", path.display(), e)))?;
    parse_detections(&content, path, query_db, reference_db)
}

/// Sort by descending score. Equal scores keep their order.
pub fn rank_detections(detections: &mut [DetectedCopy]) {
    detections.sort_by(|a, b| b.score().total_cmp(&a.score()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn databases() -> (MediaDatabase, MediaDatabase) {
        let query = MediaDatabase::from_manifest(
            PathBuf::from("/data/queries/q"),
            "V\tq1\tquery.mp4\t10\t320\t240\t0\t60\t25\n",
        )
        .unwrap();
        let reference = MediaDatabase::from_manifest(
            PathBuf::from("/data/databases/news"),
            "V\tr1\tr1.mp4\t10\t320\t240\t0\t600\t25\nV\tr2\tr2.mp4\t10\t320\t240\t0\t600\t25\n",
        )
        .unwrap();
        (query, reference)
    }

    #[test]
    fn test_parse_lines() {
        let (q, r) = databases();
        let content = "# score\tq\tfrom\tto\tr\tfrom\tto\n\
                       0.75\tq1\t0:00:05\t0:00:15\tr2\t1:02:03.5\t1:02:13.5\n\
                       # between\n\
                       0.5\tq1\t00:20\t00:30\tr1\t12\t22\n";
        let detections = parse_detections(content, Path::new("det.txt"), &q, &r).unwrap();
        assert_eq!(detections.len(), 2);

        let first = &detections[0];
        assert_eq!(first.score(), 0.75);
        assert_eq!(first.query().obj_id(), "q1");
        assert_eq!(first.reference().obj_id(), "r2");
        assert_eq!(first.query_segment(), (5.0, 15.0));
        assert_eq!(first.reference_segment(), (3723.5, 3733.5));
        assert_eq!(detections[1].reference_segment(), (12.0, 22.0));
    }

    #[test]
    fn test_wrong_field_count_is_fatal() {
        let (q, r) = databases();
        let err = parse_detections("0.5\tq1\t0\t1\tr1\t0\n", Path::new("det.txt"), &q, &r)
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse { line: 1, .. }));

        let err = parse_detections(
            "# ok\n0.5\tq1\t0\t1\tr1\t0\t1\textra\n",
            Path::new("det.txt"),
            &q,
            &r,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_blank_line_is_fatal() {
        let (q, r) = databases();
        let content = "0.5\tq1\t0\t1\tr1\t0\t1\n\n0.4\tq1\t0\t1\tr1\t0\t1\n";
        let err = parse_detections(content, Path::new("det.txt"), &q, &r).unwrap_err();
        assert!(matches!(err, EngineError::Parse { line: 2, .. }));
        assert!(err.to_string().contains("expected 7 fields, found 1"));
    }

    #[test]
    fn test_non_finite_score_is_fatal() {
        let (q, r) = databases();
        for score in ["NaN", "inf", "-inf"] {
            let content = format!("{}\tq1\t0\t1\tr1\t0\t1\n", score);
            let err = parse_detections(&content, Path::new("det.txt"), &q, &r).unwrap_err();
            assert!(matches!(err, EngineError::Parse { line: 1, .. }), "{}", score);
            assert!(err.to_string().contains("invalid score"));
        }
    }

    #[test]
    fn test_unknown_object_is_fatal() {
        let (q, r) = databases();
        let err = parse_detections("0.5\tq1\t0\t1\tr9\t0\t1\n", Path::new("det.txt"), &q, &r)
            .unwrap_err();
        assert!(err.to_string().contains("can't find r9"));

        let err = parse_detections("0.5\tr1\t0\t1\tr1\t0\t1\n", Path::new("det.txt"), &q, &r)
            .unwrap_err();
        assert!(err.to_string().contains("can't find r1"));
    }

    #[test]
    fn test_bad_timecode_is_fatal() {
        let (q, r) = databases();
        let err = parse_detections("0.5\tq1\t1.5:00\t2:00\tr1\t0\t1\n", Path::new("d"), &q, &r)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_rank_descending() {
        let (q, r) = databases();
        let content = "0.2\tq1\t0\t1\tr1\t0\t1\n0.9\tq1\t0\t1\tr1\t0\t1\n0.5\tq1\t0\t1\tr2\t0\t1\n";
        let mut detections = parse_detections(content, Path::new("d"), &q, &r).unwrap();
        rank_detections(&mut detections);
        let scores: Vec<f64> = detections.iter().map(|d| d.score()).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.2]);
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let (q, r) = databases();
        let content = "0.5\tq1\t0\t1\tr1\t0\t1\n0.5\tq1\t0\t1\tr2\t0\t1\n";
        let mut detections = parse_detections(content, Path::new("d"), &q, &r).unwrap();
        rank_detections(&mut detections);
        assert_eq!(detections[0].reference().obj_id(), "r1");
        assert_eq!(detections[1].reference().obj_id(), "r2");
    }
}
