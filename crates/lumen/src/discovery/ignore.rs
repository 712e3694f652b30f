//! Cache of directories excluded by marker files.
//!
//! Answers "is this path below an ignored directory" without walking up the
//! tree for every event. Entries are keyed by storage and marker set and are
//! only dropped through [`IgnoreCache::invalidate`], which callers must do
//! whenever a marker file appears, disappears or moves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lumen_store::{is_within, FileStore, Node, StorageId, StoreError};
use tracing::debug;

use crate::error::Result;

type CacheKey = (StorageId, Vec<String>);

pub struct IgnoreCache {
    files: Arc<dyn FileStore>,
    entries: Mutex<HashMap<CacheKey, Arc<Vec<String>>>>,
}

impl IgnoreCache {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self {
            files,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Directories of `storage_id` holding any of `markers`.
    pub fn ignored_dirs(
        &self,
        storage_id: StorageId,
        markers: &[String],
    ) -> Result<Arc<Vec<String>>> {
        let key = (storage_id, markers.to_vec());
        if let Some(dirs) = self.lock()?.get(&key) {
            return Ok(Arc::clone(dirs));
        }
        let dirs = Arc::new(self.files.marker_directories(storage_id, markers)?);
        debug!(storage = %storage_id, count = dirs.len(), "Cached ignored directories");
        self.lock()?.insert(key, Arc::clone(&dirs));
        Ok(dirs)
    }

    /// True if `node` is, or lies below, a directory holding one of `markers`.
    pub fn is_ignored(&self, node: &Node, markers: &[String]) -> Result<bool> {
        let dirs = self.ignored_dirs(node.storage_id, markers)?;
        Ok(dirs.iter().any(|dir| is_within(&node.path, dir)))
    }

    /// True if a strict ancestor of `dir_path` holds one of `markers`.
    pub fn has_ignored_ancestor(
        &self,
        storage_id: StorageId,
        dir_path: &str,
        markers: &[String],
    ) -> Result<bool> {
        let dirs = self.ignored_dirs(storage_id, markers)?;
        Ok(dirs
            .iter()
            .any(|dir| dir != dir_path && is_within(dir_path, dir)))
    }

    pub fn invalidate(&self, storage_id: StorageId) -> Result<()> {
        self.lock()?.retain(|(storage, _), _| *storage != storage_id);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<Vec<String>>>>> {
        Ok(self.entries.lock().map_err(|_| StoreError::Poisoned)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_store::{MemoryFileStore, UserId};

    fn markers() -> Vec<String> {
        vec![".nomedia".to_string(), ".noimage".to_string()]
    }

    #[test]
    fn test_descendants_of_marker_dirs_are_ignored() {
        let files = Arc::new(MemoryFileStore::new());
        let root = files.add_storage(&UserId::new("alice")).unwrap();
        let a = files.add_dir(&root, "a").unwrap();
        let b = files.add_dir(&a, "b").unwrap();
        let photo = files.add_file(&b, "p.jpg", "image/jpeg", 1).unwrap();
        files.add_file(&a, ".noimage", "application/octet-stream", 0).unwrap();
        let outside = files.add_file(&root, "q.jpg", "image/jpeg", 1).unwrap();

        let cache = IgnoreCache::new(files.clone());
        assert!(cache.is_ignored(&photo, &markers()).unwrap());
        assert!(cache.is_ignored(&a, &markers()).unwrap());
        assert!(!cache.is_ignored(&outside, &markers()).unwrap());
        assert!(cache.has_ignored_ancestor(root.storage_id, "a/b", &markers()).unwrap());
        assert!(!cache.has_ignored_ancestor(root.storage_id, "a", &markers()).unwrap());
    }

    #[test]
    fn test_stale_until_invalidated() {
        let files = Arc::new(MemoryFileStore::new());
        let root = files.add_storage(&UserId::new("alice")).unwrap();
        let photo = files.add_file(&root, "p.jpg", "image/jpeg", 1).unwrap();

        let cache = IgnoreCache::new(files.clone());
        assert!(!cache.is_ignored(&photo, &markers()).unwrap());

        files.add_file(&root, ".nomedia", "application/octet-stream", 0).unwrap();
        assert!(!cache.is_ignored(&photo, &markers()).unwrap());

        cache.invalidate(root.storage_id).unwrap();
        assert!(cache.is_ignored(&photo, &markers()).unwrap());
    }
}
