//! Media databases: a directory holding a manifest plus tool artifacts.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::media::{parse_manifest, ManifestError, MediaObject, MANIFEST_FILE};

/// Directory (inside a database) holding segmentation aliases.
pub const SEGMENTATIONS_DIR: &str = "segmentations";

/// Directory (inside a database) holding descriptor aliases.
pub const DESCRIPTORS_DIR: &str = "descriptors";

/// A collection of media objects, identified by its canonical directory.
///
/// Equality, ordering and hashing only look at [`MediaDatabase::uid`].
#[derive(Debug, Clone)]
pub struct MediaDatabase {
    uid: String,
    name: String,
    root_dir: PathBuf,
    objects: Vec<Arc<MediaObject>>,
    index: HashMap<String, usize>,
    total_bytes: u64,
    total_seconds: f64,
}

impl MediaDatabase {
    /// Open a database directory, reading its manifest synchronously.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let dir = dir.as_ref();
        let root_dir = dir.canonicalize().map_err(|source| ManifestError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let manifest = root_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest).map_err(|source| ManifestError::Io {
            path: manifest.clone(),
            source,
        })?;
        Self::from_manifest(root_dir, &content)
    }

    /// Build a database from manifest text. `root_dir` should already be canonical.
    pub fn from_manifest(root_dir: PathBuf, manifest: &str) -> Result<Self, ManifestError> {
        let objects = parse_manifest(manifest)?;
        Self::from_objects(root_dir, objects)
    }

    /// Build a database from already parsed objects.
    ///
    /// A repeated object id fails with [`ManifestError::DuplicateObject`],
    /// `line` being the 1-based position of the repeat.
    pub fn from_objects(root_dir: PathBuf, objects: Vec<MediaObject>) -> Result<Self, ManifestError> {
        let uid = uid_for(&root_dir);
        let name = root_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| uid.clone());

        let mut index = HashMap::with_capacity(objects.len());
        let mut total_bytes = 0;
        let mut total_seconds = 0.0;
        let objects: Vec<Arc<MediaObject>> = objects.into_iter().map(Arc::new).collect();
        for (pos, obj) in objects.iter().enumerate() {
            if index.insert(obj.obj_id().to_string(), pos).is_some() {
                return Err(ManifestError::DuplicateObject {
                    line: pos + 1,
                    obj_id: obj.obj_id().to_string(),
                });
            }
            total_bytes += obj.filesize();
            total_seconds += obj.seconds_length();
        }

        Ok(Self {
            uid,
            name,
            root_dir,
            objects,
            index,
            total_bytes,
            total_seconds,
        })
    }

    /// Whether `dir` looks like a database (a directory with a manifest).
    pub fn is_database_dir(dir: impl AsRef<Path>) -> bool {
        let dir = dir.as_ref();
        dir.is_dir() && dir.join(MANIFEST_FILE).is_file()
    }

    /// Canonical identity key: lowercased absolute path.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Objects in manifest order.
    pub fn objects(&self) -> &[Arc<MediaObject>] {
        &self.objects
    }

    /// Look up an object by id.
    pub fn get(&self, obj_id: &str) -> Option<&Arc<MediaObject>> {
        self.index.get(obj_id).map(|&pos| &self.objects[pos])
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_seconds(&self) -> f64 {
        self.total_seconds
    }

    /// Directory of one segmentation alias.
    pub fn segmentation_dir(&self, alias: &str) -> PathBuf {
        self.root_dir.join(SEGMENTATIONS_DIR).join(alias)
    }

    /// Directory of one descriptor alias.
    pub fn descriptor_dir(&self, alias: &str) -> PathBuf {
        self.root_dir.join(DESCRIPTORS_DIR).join(alias)
    }

    pub fn has_segmentation(&self, alias: &str) -> bool {
        self.segmentation_dir(alias).exists()
    }

    pub fn has_descriptors(&self, alias: &str) -> bool {
        self.descriptor_dir(alias).exists()
    }
}

/// Identity key for a database rooted at `root_dir`.
pub fn uid_for(root_dir: &Path) -> String {
    root_dir.to_string_lossy().to_lowercase()
}

impl PartialEq for MediaDatabase {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for MediaDatabase {}

impl Hash for MediaDatabase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

impl PartialOrd for MediaDatabase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaDatabase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uid.cmp(&other.uid)
    }
}

impl fmt::Display for MediaDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaKind;
    use tempfile::TempDir;

    const MANIFEST: &str = "V\tv1\tclips/one.mp4\t1000\t640\t480\t0.0\t10.0\t25.0\n\
                            V\tv2\tclips/two.mp4\t3000\t640\t480\t5.0\t20.0\t30.0\n\
                            I\ti1\tstill.png\t200\t64\t64\n";

    #[test]
    fn test_from_manifest_aggregates() {
        let db = MediaDatabase::from_manifest(PathBuf::from("/data/DBs/News"), MANIFEST).unwrap();
        assert_eq!(db.name(), "News");
        assert_eq!(db.uid(), "/data/dbs/news");
        assert_eq!(db.len(), 3);
        assert_eq!(db.total_bytes(), 4200);
        assert!((db.total_seconds() - 25.0).abs() < 1e-9);
        assert_eq!(db.get("v2").unwrap().filename(), "two.mp4");
        assert!(db.get("missing").is_none());

        let ids: Vec<_> = db.objects().iter().map(|o| o.obj_id()).collect();
        assert_eq!(ids, vec!["v1", "v2", "i1"]);
    }

    #[test]
    fn test_duplicate_manifest_produces_no_database() {
        let manifest = "V\tv1\ta.mp4\t1\t1\t1\t0\t1\t25\nV\tv1\tb.mp4\t1\t1\t1\t0\t1\t25\n";
        let result = MediaDatabase::from_manifest(PathBuf::from("/tmp/dup"), manifest);
        assert!(matches!(result, Err(ManifestError::DuplicateObject { .. })));
    }

    #[test]
    fn test_from_objects_rejects_repeated_id() {
        let objects = vec![
            MediaObject::new(MediaKind::Image, "i1", "a.png", 10, 8, 8),
            MediaObject::new(MediaKind::Image, "i2", "b.png", 10, 8, 8),
            MediaObject::new(MediaKind::Image, "i1", "c.png", 10, 8, 8),
        ];
        match MediaDatabase::from_objects(PathBuf::from("/tmp/dup"), objects) {
            Err(ManifestError::DuplicateObject { line, obj_id }) => {
                assert_eq!(line, 3);
                assert_eq!(obj_id, "i1");
            }
            other => panic!("expected duplicate error, got {:?}", other.map(|db| db.len())),
        }
    }

    #[test]
    fn test_identity_is_uid() {
        let a = MediaDatabase::from_manifest(PathBuf::from("/x/Ref"), MANIFEST).unwrap();
        let b = MediaDatabase::from_objects(PathBuf::from("/X/ref"), Vec::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_open_reads_directory() {
        let dir = TempDir::new().unwrap();
        assert!(!MediaDatabase::is_database_dir(dir.path()));
        std::fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).unwrap();
        assert!(MediaDatabase::is_database_dir(dir.path()));

        let db = MediaDatabase::open(dir.path()).unwrap();
        assert_eq!(db.len(), 3);
        assert!(db.root_dir().is_absolute());
        assert!(!db.has_segmentation("05seg"));

        std::fs::create_dir_all(db.segmentation_dir("05seg")).unwrap();
        assert!(db.has_segmentation("05seg"));
        assert!(db.segmentation_dir("05seg").ends_with("segmentations/05seg"));
    }
}
