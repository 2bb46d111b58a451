//! Database creation: content-addressed query databases and reference databases.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::info;
use vcd_models::MediaDatabase;
use vcd_process::{args, Tool};

use crate::error::{EngineError, EngineResult};
use crate::registry::DatabaseRegistry;
use crate::runner::StageRunner;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Deterministic database id for a file: SHA-256 hex of its bytes followed by
/// its length.
pub async fn content_id(path: &Path) -> EngineResult<String> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        EngineError::not_found(format!("query file {}: {}", path.display(), e))
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut length: u64 = 0;
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        length += read as u64;
    }

    Ok(format!("{:x}{}", hasher.finalize(), length))
}

/// Query database for `file`, created only when no database with the same
/// content id exists.
pub async fn materialize_query(
    file: &Path,
    registry: &DatabaseRegistry,
    runner: &StageRunner,
) -> EngineResult<Arc<MediaDatabase>> {
    let id = content_id(file).await?;
    if let Some(db) = registry.query_database(&id).await? {
        info!(id = %id, "Reusing query database");
        return Ok(db);
    }

    tokio::fs::create_dir_all(registry.queries_dir()).await?;
    let dir = registry.query_dir(&id);
    info!(id = %id, file = %file.display(), "Creating query database");
    runner
        .tool(Tool::DatabaseBuilder, args!["-new", "-db", &dir, file])
        .await?;

    registry.query_database(&id).await?.ok_or_else(|| {
        EngineError::not_found(format!("query database {} was not created", dir.display()))
    })
}

/// Create reference database `name` from video files and directories.
///
/// Nothing runs when the database directory already exists. Inputs are
/// deduplicated and sorted.
pub async fn build_reference_database(
    name: &str,
    files: &[PathBuf],
    registry: &DatabaseRegistry,
    runner: &StageRunner,
) -> EngineResult<Arc<MediaDatabase>> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(EngineError::invalid_request(format!(
            "invalid database name '{}'",
            name
        )));
    }
    if files.is_empty() {
        return Err(EngineError::invalid_request("no input files"));
    }

    let sink = runner.sink().clone();
    sink.on_progress("Creating database...", 0.0);

    tokio::fs::create_dir_all(registry.databases_dir()).await?;
    let dir = registry.database_dir(name);
    if tokio::fs::try_exists(&dir).await? {
        info!(name = %name, "Database directory exists, skipping creation");
    } else {
        let inputs: BTreeSet<&PathBuf> = files.iter().collect();
        let inputs: Vec<&PathBuf> = inputs.into_iter().collect();
        runner
            .tool(
                Tool::DatabaseBuilder,
                args!["-new", "-db", &dir, "-recursiveDirs", "-fileType", "video", inputs],
            )
            .await?;
    }

    let db = registry.open(&dir).await?;
    sink.on_progress(&format!("Database {} created OK", name), 1.0);
    Ok(db)
}
