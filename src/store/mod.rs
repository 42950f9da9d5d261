//! Persistent on-disk tile store.
//!
//! Every media identity maps to one directory named by the SHA-256 of the
//! identity, so arbitrary strings (paths, URLs, `dynamic:` names) are safe
//! to use as keys. Inside it tiles are laid out by level and row:
//!
//! ```text
//! <root>/
//! └── <sha256(media_id)>/
//!     ├── metadata                       key  value  typename
//!     ├── 00/000000/00_000000_000000.jpg
//!     ├── 01/000000/01_000000_000000.jpg
//!     │          └─ 01_000000_000001.jpg
//!     └── ...
//! ```
//!
//! Metadata records are read lazily and cached in memory for the lifetime of
//! the store.

mod metadata;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::tile::TileId;

pub use metadata::{
    max_tile_level, tiles_at_level, total_tile_count, MetadataValue, PyramidMetadata,
    KEY_ASPECT_RATIO, KEY_FILE_EXT, KEY_HEIGHT, KEY_MAX_LEVEL, KEY_TILE_SIZE, KEY_WIDTH,
};

/// Name of the metadata file inside each media directory.
const METADATA_FILE: &str = "metadata";

type MetadataRecord = Arc<BTreeMap<String, MetadataValue>>;

/// Content-addressed tile storage rooted at one directory.
pub struct TileStore {
    root: PathBuf,

    /// Parsed metadata records, keyed by media identity
    metadata: Mutex<HashMap<String, MetadataRecord>>,

    /// Advisory lock for callers serializing disk-heavy work
    disk_lock: Mutex<()>,
}

impl TileStore {
    /// Open a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            metadata: Mutex::new(HashMap::new()),
            disk_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all files of `media_id`.
    pub fn media_path(&self, media_id: &str) -> PathBuf {
        let digest = Sha256::digest(media_id.as_bytes());
        self.root.join(hex::encode(digest))
    }

    /// Path of the file storing tile `id`.
    ///
    /// # Arguments
    ///
    /// * `create_dirs` - Create the level and row directories if missing
    /// * `prefix` - Use this directory instead of the media directory
    /// * `ext` - Use this extension instead of the recorded `filext`
    ///
    /// # Errors
    ///
    /// Returns `MissingMetadata` if no extension is given and none is
    /// recorded, or `Io` if the directories cannot be created.
    pub fn tile_path(
        &self,
        id: &TileId,
        create_dirs: bool,
        prefix: Option<&Path>,
        ext: Option<&str>,
    ) -> Result<PathBuf, StoreError> {
        let ext = match ext {
            Some(ext) => ext.to_string(),
            None => self
                .read_metadata(id.media_id(), KEY_FILE_EXT)
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| StoreError::MissingMetadata {
                    media_id: id.media_id().to_string(),
                    key: KEY_FILE_EXT.to_string(),
                })?,
        };

        let base = match prefix {
            Some(prefix) => prefix.to_path_buf(),
            None => self.media_path(id.media_id()),
        };
        let dir = base
            .join(format!("{:02}", id.level))
            .join(format!("{:06}", id.row));

        if create_dirs {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        Ok(dir.join(format!(
            "{:02}_{:06}_{:06}.{}",
            id.level, id.row, id.col, ext
        )))
    }

    /// Persist `values` as the metadata record of `media_id`.
    ///
    /// Replaces any previous record. The file is written to a temporary name
    /// and renamed into place so readers never see a partial record.
    pub fn write_metadata(
        &self,
        media_id: &str,
        values: &BTreeMap<String, MetadataValue>,
    ) -> Result<(), StoreError> {
        let dir = self.media_path(media_id);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(METADATA_FILE);
        let tmp_path = dir.join(format!("{}.tmp", METADATA_FILE));

        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            for (key, value) in values {
                file.write_all(value.to_line(key).as_bytes())?;
            }
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        };
        write().map_err(|e| StoreError::io(&path, e))?;

        self.records()
            .insert(media_id.to_string(), Arc::new(values.clone()));
        debug!(media_id, keys = values.len(), "Wrote metadata");
        Ok(())
    }

    /// Look up one metadata key; `None` if the record or key is absent.
    pub fn read_metadata(&self, media_id: &str, key: &str) -> Option<MetadataValue> {
        self.record(media_id)?.get(key).cloned()
    }

    /// Full metadata record of `media_id`, loading it from disk if needed.
    pub fn record(&self, media_id: &str) -> Option<MetadataRecord> {
        if let Some(record) = self.records().get(media_id) {
            return Some(Arc::clone(record));
        }

        // Not cached: absent records are re-checked on every call since a
        // build may complete later.
        let record = Arc::new(self.load_record(media_id)?);
        self.records()
            .insert(media_id.to_string(), Arc::clone(&record));
        Some(record)
    }

    /// Typed pyramid description of `media_id`, if one is recorded.
    pub fn pyramid_metadata(&self, media_id: &str) -> Option<PyramidMetadata> {
        PyramidMetadata::from_values(&*self.record(media_id)?)
    }

    /// True if both the metadata record and the level-0 tile exist.
    pub fn is_tiled(&self, media_id: &str) -> bool {
        if !self.media_path(media_id).join(METADATA_FILE).is_file() {
            return false;
        }
        match self.tile_path(&TileId::root(media_id), false, None, None) {
            Ok(path) => path.is_file(),
            Err(_) => false,
        }
    }

    /// Delete every stored tile and the metadata record of `media_id`.
    pub fn purge_media(&self, media_id: &str) -> Result<(), StoreError> {
        self.forget_metadata(media_id);
        let dir = self.media_path(media_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(media_id, "Purged media directory");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    /// Drop the in-memory copy of a metadata record.
    pub(crate) fn forget_metadata(&self, media_id: &str) {
        self.records().remove(media_id);
    }

    /// Acquire the advisory disk lock.
    pub fn disk_lock(&self) -> MutexGuard<'_, ()> {
        self.disk_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, MetadataRecord>> {
        self.metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_record(&self, media_id: &str) -> Option<BTreeMap<String, MetadataValue>> {
        let path = self.media_path(media_id).join(METADATA_FILE);
        let contents = fs::read_to_string(&path).ok()?;

        let mut values = BTreeMap::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            match MetadataValue::parse_line(line) {
                Ok(Some((key, value))) => {
                    values.insert(key, value);
                }
                Ok(None) => debug!(media_id, line, "Skipping metadata value of wrong type"),
                Err(e) => warn!(media_id, error = %e, "Skipping malformed metadata line"),
            }
        }
        Some(values)
    }
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore").field("root", &self.root).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Tile;

    fn store() -> (tempfile::TempDir, TileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TileStore::new(dir.path().join("tilestore"));
        (dir, store)
    }

    #[test]
    fn test_media_path_is_hashed() {
        let (_dir, store) = store();
        let path = store.media_path("/home/user/My Pictures/a b?.ppm");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(path, store.media_path("/home/user/My Pictures/a b?.ppm"));
        assert_ne!(path, store.media_path("other"));
    }

    #[test]
    fn test_tile_path_layout() {
        let (_dir, store) = store();
        let id = TileId::new("img", 3, 5, 12);
        let path = store.tile_path(&id, false, None, Some("png")).unwrap();
        assert!(path.ends_with("03/000005/03_000005_000012.png"));
        assert!(path.starts_with(store.media_path("img")));
        assert!(!path.parent().unwrap().exists());
    }

    #[test]
    fn test_tile_path_creates_dirs_and_uses_prefix() {
        let (dir, store) = store();
        let prefix = dir.path().join("elsewhere");
        let id = TileId::new("img", 1, 0, 1);
        let path = store.tile_path(&id, true, Some(prefix.as_path()), Some("jpg")).unwrap();
        assert_eq!(path, prefix.join("01/000000/01_000000_000001.jpg"));
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn test_tile_path_requires_extension() {
        let (_dir, store) = store();
        let result = store.tile_path(&TileId::root("img"), false, None, None);
        assert!(matches!(result, Err(StoreError::MissingMetadata { .. })));
    }

    #[test]
    fn test_metadata_round_trip() {
        let (_dir, store) = store();
        let meta = PyramidMetadata::for_image(256, "jpg", 600, 400);
        store.write_metadata("img", &meta.to_values()).unwrap();

        // a fresh store must reload the record from disk
        let reopened = TileStore::new(store.root());
        assert_eq!(reopened.pyramid_metadata("img"), Some(meta));
        assert_eq!(
            reopened.read_metadata("img", KEY_FILE_EXT),
            Some(MetadataValue::Str("jpg".to_string()))
        );
        assert_eq!(reopened.read_metadata("img", "missing"), None);
        assert_eq!(reopened.read_metadata("other", KEY_FILE_EXT), None);
    }

    #[test]
    fn test_tile_path_uses_recorded_extension() {
        let (_dir, store) = store();
        let meta = PyramidMetadata::for_image(256, "png", 10, 10);
        store.write_metadata("img", &meta.to_values()).unwrap();
        let path = store.tile_path(&TileId::root("img"), false, None, None).unwrap();
        assert_eq!(path.extension().unwrap(), "png");
    }

    #[test]
    fn test_is_tiled() {
        let (_dir, store) = store();
        assert!(!store.is_tiled("img"));

        let meta = PyramidMetadata::for_image(256, "png", 4, 4);
        store.write_metadata("img", &meta.to_values()).unwrap();
        assert!(!store.is_tiled("img"));

        let path = store.tile_path(&TileId::root("img"), true, None, None).unwrap();
        Tile::new(4, 4).save(&path).unwrap();
        assert!(store.is_tiled("img"));
    }

    #[test]
    fn test_purge_media() {
        let (_dir, store) = store();
        let meta = PyramidMetadata::for_image(256, "png", 4, 4);
        store.write_metadata("img", &meta.to_values()).unwrap();
        let path = store.tile_path(&TileId::root("img"), true, None, None).unwrap();
        Tile::new(4, 4).save(&path).unwrap();

        store.purge_media("img").unwrap();
        assert!(!store.media_path("img").exists());
        assert!(!store.is_tiled("img"));
        assert!(store.pyramid_metadata("img").is_none());

        // purging twice is harmless
        store.purge_media("img").unwrap();
    }

    #[test]
    fn test_malformed_metadata_lines_are_skipped() {
        let (_dir, store) = store();
        let dir = store.media_path("img");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(METADATA_FILE),
            "tilesize\t256\tint\ngarbage\nfilext\tjpg\tstring\nwidth\tx\tint\n",
        )
        .unwrap();

        assert_eq!(store.read_metadata("img", KEY_TILE_SIZE), Some(MetadataValue::Int(256)));
        assert_eq!(store.read_metadata("img", KEY_WIDTH), None);
        assert!(store.pyramid_metadata("img").is_some());
    }
}
