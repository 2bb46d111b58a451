//! Query acquisition from a URL.
//!
//! A header-only request decides between a direct download and media
//! extraction from a hosting page.

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use url::Url;
use vcd_models::has_media_extension;
use vcd_process::{args, Tool};

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::runner::StageRunner;

/// Download `url` into a fresh `download-*` directory and return the media file.
pub async fn download_query(
    url: &Url,
    downloads_dir: &Path,
    runner: &StageRunner,
) -> EngineResult<PathBuf> {
    tokio::fs::create_dir_all(downloads_dir).await?;
    let target = tempfile::Builder::new()
        .prefix("download-")
        .tempdir_in(downloads_dir)?
        .keep();

    if is_direct_media(url, &target, runner).await? {
        info!(url = %url, "Downloading media file");
        runner
            .tool_in(
                Tool::Downloader,
                args!["--no-directories", "--no-check-certificate", url],
                &target,
            )
            .await?;
    } else {
        info!(url = %url, "Extracting media from page");
        runner
            .tool_in(
                Tool::MediaExtractor,
                args!["--restrict-filenames", url],
                &target,
            )
            .await?;
    }

    find_media_file(&target)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("no image or video downloaded from {}", url)))
}

/// Whether the server declares an image or video content type.
///
/// A failed header request counts as "not direct media"; cancellation still aborts.
async fn is_direct_media(
    url: &Url,
    working_dir: &Path,
    runner: &StageRunner,
) -> EngineResult<bool> {
    let headers = runner
        .tool_in(
            Tool::Downloader,
            args![
                "--server-response",
                "--spider",
                "--no-check-certificate",
                url
            ],
            working_dir,
        )
        .await;

    match headers {
        Ok(output) => Ok(declares_media_type(&output.stderr)),
        Err(e) if e.kind() == ErrorKind::Cancelled => Err(e),
        Err(e) => {
            warn!(url = %url, error = %e, "Header request failed, falling back to media extraction");
            Ok(false)
        }
    }
}

/// Scan response headers for `Content-Type: video/*` or `image/*`.
pub fn declares_media_type(headers: &str) -> bool {
    headers.lines().any(|line| {
        let line = line.trim().to_ascii_lowercase();
        line.strip_prefix("content-type:")
            .map(|value| {
                let value = value.trim_start();
                value.starts_with("video/") || value.starts_with("image/")
            })
            .unwrap_or(false)
    })
}

/// First file (by name) in `dir` with an image or video extension.
pub async fn find_media_file(dir: &Path) -> EngineResult<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name();
        if is_file && has_media_extension(&name.to_string_lossy()) {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_declares_media_type() {
        let headers = "HTTP/1.1 200 OK\n  Date: Sat, 17 Oct 2026\n  Content-Type: video/mp4\n";
        assert!(declares_media_type(headers));
        assert!(declares_media_type("  content-type: image/png"));
        assert!(!declares_media_type("  Content-Type: text/html; charset=utf-8"));
        assert!(!declares_media_type("Spider mode enabled."));
    }

    #[tokio::test]
    async fn test_find_media_file_picks_first_by_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "").unwrap();
        std::fs::write(dir.path().join("b_clip.mp4"), "").unwrap();
        std::fs::write(dir.path().join("a_clip.webm"), "").unwrap();
        std::fs::create_dir(dir.path().join("0_dir.mp4")).unwrap();

        let found = find_media_file(dir.path()).await.unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "a_clip.webm");
    }

    #[tokio::test]
    async fn test_find_media_file_none() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("page.html"), "").unwrap();
        assert!(find_media_file(dir.path()).await.unwrap().is_none());
    }
}
