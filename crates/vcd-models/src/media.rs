//! Media objects and the `files.txt` manifest format.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timecode::format_hhmmss;

/// Name of the manifest file inside every database directory.
pub const MANIFEST_FILE: &str = "files.txt";

/// Image file extensions accepted as query media.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

/// Video file extensions accepted as query media.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "avi", "mkv", "mov", "flv", "webm", "mpg", "mpeg", "wmv", "3gp", "ogv", "ts",
    "vob",
];

/// Check whether a file name carries a known image or video extension.
pub fn has_media_extension(file_name: &str) -> bool {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str()) || VIDEO_EXTENSIONS.contains(&ext.as_str())
}

/// Errors raised while reading a database manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("line {line}: expected at least {expected} columns, found {found}")]
    MissingColumns {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: invalid {column} value '{value}'")]
    InvalidValue {
        line: usize,
        column: &'static str,
        value: String,
    },

    #[error("line {line}: duplicated object {obj_id}")]
    DuplicateObject { line: usize, obj_id: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Kind flag of a manifest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    /// Any flag other than `I` or `V`.
    Other,
}

impl MediaKind {
    /// Parse the first manifest column.
    pub fn from_flag(flag: &str) -> Self {
        match flag {
            "I" => MediaKind::Image,
            "V" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

/// One image or video known to a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaObject {
    obj_id: String,
    file_path: String,
    filename: String,
    kind: MediaKind,
    filesize: u64,
    width: u32,
    height: u32,
    fps: f64,
    seconds_length: f64,
}

impl MediaObject {
    /// Create an object. `file_path` is normalized to forward slashes.
    pub fn new(
        kind: MediaKind,
        obj_id: impl Into<String>,
        file_path: impl Into<String>,
        filesize: u64,
        width: u32,
        height: u32,
    ) -> Self {
        let file_path = file_path.into().replace('\\', "/");
        let filename = file_path
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            obj_id: obj_id.into(),
            file_path,
            filename,
            kind,
            filesize,
            width,
            height,
            fps: 0.0,
            seconds_length: 0.0,
        }
    }

    /// Attach video timing.
    pub fn with_timing(mut self, seconds_length: f64, fps: f64) -> Self {
        self.seconds_length = seconds_length;
        self.fps = fps;
        self
    }

    pub fn obj_id(&self) -> &str {
        &self.obj_id
    }

    /// Path relative to the database's media root, forward-slash separated.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_image(&self) -> bool {
        self.kind == MediaKind::Image
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn filesize(&self) -> u64 {
        self.filesize
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn seconds_length(&self) -> f64 {
        self.seconds_length
    }

    /// Duration as `HH:MM:SS`.
    pub fn time_text(&self) -> String {
        format_hhmmss(self.seconds_length)
    }

    /// File size in binary units, e.g. `1.5 MB`.
    pub fn size_text(&self) -> String {
        format_size(self.filesize)
    }
}

/// Render a byte count in binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} bytes", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Parse a whole manifest.
///
/// Rows are returned in manifest order. A duplicated object id rejects the
/// whole manifest.
pub fn parse_manifest(content: &str) -> Result<Vec<MediaObject>, ManifestError> {
    let mut objects = Vec::new();
    let mut seen = HashSet::new();

    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim_end_matches('\r');
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let object = parse_manifest_row(raw, line)?;
        if !seen.insert(object.obj_id.clone()) {
            return Err(ManifestError::DuplicateObject {
                line,
                obj_id: object.obj_id,
            });
        }
        objects.push(object);
    }

    Ok(objects)
}

/// Parse one tab-separated manifest row.
pub fn parse_manifest_row(row: &str, line: usize) -> Result<MediaObject, ManifestError> {
    let cols: Vec<&str> = row.split('\t').collect();
    if cols.len() < 6 {
        return Err(ManifestError::MissingColumns {
            line,
            expected: 6,
            found: cols.len(),
        });
    }

    let kind = MediaKind::from_flag(cols[0]);
    let object = MediaObject::new(
        kind,
        cols[1],
        cols[2],
        parse_column(cols[3], "filesize", line)?,
        parse_column(cols[4], "width", line)?,
        parse_column(cols[5], "height", line)?,
    );

    if kind != MediaKind::Video {
        return Ok(object);
    }

    if cols.len() < 9 {
        return Err(ManifestError::MissingColumns {
            line,
            expected: 9,
            found: cols.len(),
        });
    }
    let start: f64 = parse_column(cols[6], "start time", line)?;
    let end: f64 = parse_column(cols[7], "end time", line)?;
    let fps: f64 = parse_column(cols[8], "fps", line)?;

    Ok(object.with_timing(end - start, fps))
}

fn parse_column<T: std::str::FromStr>(
    value: &str,
    column: &'static str,
    line: usize,
) -> Result<T, ManifestError> {
    value
        .trim()
        .parse()
        .map_err(|_| ManifestError::InvalidValue {
            line,
            column,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_row() {
        let objects = parse_manifest("V\tobjA\tdir/a.mp4\t1000\t640\t480\t0.0\t10.0\t25.0").unwrap();
        assert_eq!(objects.len(), 1);

        let obj = &objects[0];
        assert!(obj.is_video());
        assert!(!obj.is_image());
        assert_eq!(obj.obj_id(), "objA");
        assert_eq!(obj.filename(), "a.mp4");
        assert_eq!(obj.filesize(), 1000);
        assert_eq!(obj.width(), 640);
        assert_eq!(obj.height(), 480);
        assert!((obj.seconds_length() - 10.0).abs() < 1e-9);
        assert!((obj.fps() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_image_row_and_normalize_path() {
        let objects = parse_manifest("I\timg1\tphotos\\cat.JPG\t512\t100\t80\n").unwrap();
        let obj = &objects[0];
        assert!(obj.is_image());
        assert_eq!(obj.file_path(), "photos/cat.JPG");
        assert_eq!(obj.filename(), "cat.JPG");
        assert_eq!(obj.seconds_length(), 0.0);
    }

    #[test]
    fn test_manifest_keeps_order_and_skips_comments() {
        let content = "# header\n\nV\tb\tb.mp4\t1\t1\t1\t2.0\t5.0\t30\nV\ta\ta.mp4\t1\t1\t1\t0\t1\t30\n";
        let ids: Vec<_> = parse_manifest(content)
            .unwrap()
            .iter()
            .map(|o| o.obj_id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_duplicate_object_fails() {
        let content = "V\tx\ta.mp4\t1\t1\t1\t0\t1\t30\nV\tx\tb.mp4\t1\t1\t1\t0\t1\t30\n";
        let err = parse_manifest(content).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateObject { line: 2, .. }));
    }

    #[test]
    fn test_malformed_rows() {
        assert!(matches!(
            parse_manifest("V\tx\ta.mp4\t1\t1\t1"),
            Err(ManifestError::MissingColumns { expected: 9, .. })
        ));
        assert!(matches!(
            parse_manifest("I\tx\ta.png\tbig\t1\t1"),
            Err(ManifestError::InvalidValue { column: "filesize", .. })
        ));
    }

    #[test]
    fn test_media_extensions() {
        assert!(has_media_extension("clip.MP4"));
        assert!(has_media_extension("frame.jpeg"));
        assert!(!has_media_extension("page.html"));
        assert!(!has_media_extension("README"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
