//! Registry of open media databases.
//!
//! Databases are keyed by their canonical uid and opened at most once; later
//! lookups return the cached handle without re-reading the manifest. Every
//! lookup and insertion goes through one mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use vcd_models::database::uid_for;
use vcd_models::{MediaDatabase, MANIFEST_FILE};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

pub struct DatabaseRegistry {
    databases_dir: PathBuf,
    queries_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<MediaDatabase>>>,
}

impl DatabaseRegistry {
    pub fn new(databases_dir: impl Into<PathBuf>, queries_dir: impl Into<PathBuf>) -> Self {
        Self {
            databases_dir: databases_dir.into(),
            queries_dir: queries_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.databases_dir, &config.queries_dir)
    }

    pub fn databases_dir(&self) -> &Path {
        &self.databases_dir
    }

    pub fn queries_dir(&self) -> &Path {
        &self.queries_dir
    }

    /// Directory a reference database called `name` lives in.
    pub fn database_dir(&self, name: &str) -> PathBuf {
        self.databases_dir.join(name)
    }

    /// Directory of the query database with content id `id`.
    pub fn query_dir(&self, id: &str) -> PathBuf {
        self.queries_dir.join(id)
    }

    /// Open the database in `dir`, reusing a cached handle.
    pub async fn open(&self, dir: impl AsRef<Path>) -> EngineResult<Arc<MediaDatabase>> {
        let mut cache = self.cache.lock().await;
        open_cached(&mut cache, dir.as_ref()).await
    }

    /// Every valid database under the databases directory, sorted by uid.
    ///
    /// Directories without a manifest are ignored. A broken manifest is
    /// logged and skipped.
    pub async fn reference_databases(&self) -> EngineResult<Vec<Arc<MediaDatabase>>> {
        let mut cache = self.cache.lock().await;

        let mut entries = match tokio::fs::read_dir(&self.databases_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if tokio::fs::metadata(path.join(MANIFEST_FILE))
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                dirs.push(path);
            }
        }
        dirs.sort();

        let mut databases = Vec::with_capacity(dirs.len());
        for dir in dirs {
            match open_cached(&mut cache, &dir).await {
                Ok(db) => databases.push(db),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Skipping unreadable database"),
            }
        }
        databases.sort();
        Ok(databases)
    }

    /// Reference database by directory name.
    pub async fn reference_database(&self, name: &str) -> EngineResult<Arc<MediaDatabase>> {
        let dir = self.database_dir(name);
        if !MediaDatabase::is_database_dir(&dir) {
            return Err(EngineError::not_found(format!(
                "reference database {} ({})",
                name,
                dir.display()
            )));
        }
        self.open(dir).await
    }

    /// Query database with content id `id`, if it was created before.
    pub async fn query_database(&self, id: &str) -> EngineResult<Option<Arc<MediaDatabase>>> {
        let dir = self.query_dir(id);
        if !MediaDatabase::is_database_dir(&dir) {
            return Ok(None);
        }
        self.open(dir).await.map(Some)
    }

    /// Cached handle for `uid`, without touching the filesystem.
    pub async fn cached(&self, uid: &str) -> Option<Arc<MediaDatabase>> {
        self.cache.lock().await.get(uid).cloned()
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}

async fn open_cached(
    cache: &mut HashMap<String, Arc<MediaDatabase>>,
    dir: &Path,
) -> EngineResult<Arc<MediaDatabase>> {
    let root_dir = tokio::fs::canonicalize(dir)
        .await
        .map_err(|_| EngineError::not_found(format!("database directory {}", dir.display())))?;
    let uid = uid_for(&root_dir);
    if let Some(db) = cache.get(&uid) {
        return Ok(db.clone());
    }

    let manifest = root_dir.join(MANIFEST_FILE);
    let content = tokio::fs::read_to_string(&manifest)
        .await
        .map_err(|_| EngineError::not_found(format!("manifest {}", manifest.display())))?;
    let db = MediaDatabase::from_manifest(root_dir, &content).map_err(|source| {
        EngineError::Manifest {
            path: manifest.clone(),
            source,
        }
    })?;

    debug!(uid = %uid, objects = db.len(), "Opened database");
    let db = Arc::new(db);
    cache.insert(uid, db.clone());
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = "V\tv1\ta.mp4\t100\t320\t240\t0.0\t12.0\t25.0\n";

    fn write_db(root: &Path, name: &str, manifest: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_open_reuses_cached_instance() {
        let tmp = TempDir::new().unwrap();
        let dir = write_db(tmp.path(), "News", MANIFEST);
        let registry = DatabaseRegistry::new(tmp.path(), tmp.path().join("queries"));

        let first = registry.open(&dir).await.unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "garbage").unwrap();
        let second = registry.open(dir.join("..").join("News")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);
        assert!(registry.cached(first.uid()).await.is_some());
    }

    #[tokio::test]
    async fn test_reference_discovery_skips_broken() {
        let tmp = TempDir::new().unwrap();
        write_db(tmp.path(), "b_sports", MANIFEST);
        write_db(tmp.path(), "a_news", MANIFEST);
        write_db(
            tmp.path(),
            "c_broken",
            "V\tx\ta.mp4\t1\t1\t1\t0\t1\t25\nV\tx\tb.mp4\t1\t1\t1\t0\t1\t25\n",
        );
        std::fs::create_dir_all(tmp.path().join("not_a_db")).unwrap();

        let registry = DatabaseRegistry::new(tmp.path(), tmp.path().join("queries"));
        let dbs = registry.reference_databases().await.unwrap();
        let names: Vec<_> = dbs.iter().map(|db| db.name().to_string()).collect();
        assert_eq!(names, vec!["a_news", "b_sports"]);

        // The broken database was not cached.
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_missing_databases_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = DatabaseRegistry::new(tmp.path().join("none"), tmp.path().join("queries"));
        assert!(registry.reference_databases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_database_lookup() {
        let tmp = TempDir::new().unwrap();
        let queries = tmp.path().join("queries");
        let registry = DatabaseRegistry::new(tmp.path().join("dbs"), &queries);

        assert!(registry.query_database("abc123").await.unwrap().is_none());
        write_db(&queries, "abc123", MANIFEST);
        let db = registry.query_database("abc123").await.unwrap().unwrap();
        assert_eq!(db.name(), "abc123");
        assert_eq!(db.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let registry = DatabaseRegistry::new(tmp.path(), tmp.path().join("queries"));
        let err = registry.reference_database("missing").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
