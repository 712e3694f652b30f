//! Persistent CLI state
//!
//! Each invocation loads the result store and the registered storages from
//! one JSON file and writes them back when the command succeeds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use lumen::Collaborators;
use lumen_store::{
    AccessResolver, FileId, FileStore, LocalFileStore, LocalRegistry, MemorySnapshot, MemoryStore,
    Node, StorageId, StoreError, UserId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRecord {
    pub id: StorageId,
    pub root: PathBuf,
    pub owner: UserId,
    #[serde(default)]
    pub registry: LocalRegistry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    store: MemorySnapshot,
    #[serde(default)]
    storages: Vec<StorageRecord>,
}

/// Every registered local storage behind one file store.
#[derive(Debug, Clone, Default)]
pub struct LocalLibrary {
    storages: BTreeMap<StorageId, Arc<LocalFileStore>>,
}

impl LocalLibrary {
    pub fn storages(&self) -> impl Iterator<Item = &Arc<LocalFileStore>> {
        self.storages.values()
    }

    fn get(&self, id: StorageId) -> lumen_store::Result<&Arc<LocalFileStore>> {
        self.storages
            .get(&id)
            .ok_or_else(|| StoreError::NotADirectory(format!("storage {}", id)))
    }

    fn owning(&self, file_id: FileId) -> Option<&Arc<LocalFileStore>> {
        self.storages.get(&LocalFileStore::storage_of(file_id))
    }
}

impl FileStore for LocalLibrary {
    fn node(&self, id: FileId) -> lumen_store::Result<Option<Node>> {
        match self.owning(id) {
            Some(store) => store.node(id),
            None => Ok(None),
        }
    }

    fn node_by_path(&self, storage_id: StorageId, path: &str) -> lumen_store::Result<Option<Node>> {
        match self.storages.get(&storage_id) {
            Some(store) => store.node_by_path(storage_id, path),
            None => Ok(None),
        }
    }

    fn children(&self, folder: &Node) -> lumen_store::Result<Vec<Node>> {
        self.get(folder.storage_id)?.children(folder)
    }

    fn child_exists(&self, folder: &Node, name: &str) -> lumen_store::Result<bool> {
        self.get(folder.storage_id)?.child_exists(folder, name)
    }

    fn marker_directories(
        &self,
        storage_id: StorageId,
        markers: &[String],
    ) -> lumen_store::Result<Vec<String>> {
        match self.storages.get(&storage_id) {
            Some(store) => store.marker_directories(storage_id, markers),
            None => Ok(Vec::new()),
        }
    }

    fn local_path(&self, id: FileId) -> lumen_store::Result<Option<PathBuf>> {
        match self.owning(id) {
            Some(store) => store.local_path(id),
            None => Ok(None),
        }
    }
}

impl AccessResolver for LocalLibrary {
    fn users_with_access(&self, file_id: FileId) -> lumen_store::Result<Vec<UserId>> {
        match self.owning(file_id) {
            Some(store) => store.users_with_access(file_id),
            None => Err(StoreError::NodeNotFound(file_id)),
        }
    }
}

pub struct CliState {
    path: PathBuf,
    pub store: Arc<MemoryStore>,
    pub library: Arc<LocalLibrary>,
}

impl CliState {
    pub fn load(path: &Path) -> Result<Self> {
        let file: StateFile = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read state file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Corrupt state file {}", path.display()))?
        } else {
            StateFile::default()
        };

        let mut library = LocalLibrary::default();
        for record in file.storages {
            let root = record.root.clone();
            match LocalFileStore::open(&record.root, record.id, record.owner, record.registry) {
                Ok(store) => {
                    library.storages.insert(record.id, Arc::new(store));
                }
                Err(e) => tracing::warn!(
                    storage = %record.id,
                    root = %root.display(),
                    error = %e,
                    "Registered storage is unavailable"
                ),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            store: Arc::new(MemoryStore::from_snapshot(file.store)),
            library: Arc::new(library),
        })
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.library.clone(), self.store.clone())
    }

    /// Register `root` for `owner`, reusing the storage if already known.
    pub fn add_storage(&mut self, root: &Path, owner: &UserId) -> Result<Arc<LocalFileStore>> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", root.display()))?;
        if let Some(existing) = self.library.storages().find(|s| s.root() == root) {
            return Ok(existing.clone());
        }
        let id = self
            .library
            .storages
            .keys()
            .next_back()
            .map_or(1, |last| last.get() + 1);
        let store = Arc::new(LocalFileStore::open(
            root,
            StorageId::new(id),
            owner.clone(),
            LocalRegistry::default(),
        )?);
        Arc::make_mut(&mut self.library)
            .storages
            .insert(store.storage_id(), store.clone());
        Ok(store)
    }

    /// The storage holding `path` and the path relative to its root. The
    /// path need not exist any more.
    pub fn locate(&self, path: &Path) -> Result<Option<(Arc<LocalFileStore>, String)>> {
        let absolute = resolve(path)?;
        for store in self.library.storages() {
            if absolute.starts_with(store.root()) {
                let relative = store.relative_path(&absolute)?;
                return Ok(Some((store.clone(), relative)));
            }
        }
        Ok(None)
    }

    pub fn save(&self) -> Result<()> {
        let mut storages = Vec::new();
        for store in self.library.storages() {
            storages.push(StorageRecord {
                id: store.storage_id(),
                root: store.root().to_path_buf(),
                owner: store.owner().clone(),
                registry: store.registry()?,
            });
        }
        let file = StateFile {
            store: self.store.snapshot()?,
            storages,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to write state file {}", self.path.display()))?;
        Ok(())
    }
}

/// Absolute, symlink-free form of `path`; for a vanished path the closest
/// existing ancestor is resolved and the rest appended.
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut existing = absolute.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            let mut resolved = real;
            for part in tail.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(absolute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_store::WorkQueue;

    #[test]
    fn test_state_roundtrip_keeps_ids_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir(&media).unwrap();
        fs::write(media.join("a.jpg"), b"jpg").unwrap();
        let state_path = dir.path().join("state").join("state.json");

        let mut state = CliState::load(&state_path).unwrap();
        let storage = state.add_storage(&media, &UserId::new("alice")).unwrap();
        let node = storage.node_by_path(storage.storage_id(), "a.jpg").unwrap().unwrap();
        state
            .store
            .insert(&lumen_store::WorkItem::for_node("imagenet", &node, false))
            .unwrap();
        state.save().unwrap();

        let reloaded = CliState::load(&state_path).unwrap();
        let (store, relative) = reloaded.locate(&media.join("a.jpg")).unwrap().unwrap();
        assert_eq!(relative, "a.jpg");
        let again = store.node_by_path(store.storage_id(), "a.jpg").unwrap().unwrap();
        assert_eq!(again.id, node.id);
        assert!(reloaded.store.contains("imagenet", node.id).unwrap());
        assert_eq!(reloaded.library.node(node.id).unwrap().unwrap().path, "a.jpg");
    }

    #[test]
    fn test_storages_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("one");
        let two = dir.path().join("two");
        fs::create_dir(&one).unwrap();
        fs::create_dir(&two).unwrap();

        let mut state = CliState::load(&dir.path().join("state.json")).unwrap();
        let alice = UserId::new("alice");
        let a = state.add_storage(&one, &alice).unwrap();
        let b = state.add_storage(&two, &alice).unwrap();
        let again = state.add_storage(&one, &alice).unwrap();
        assert_ne!(a.storage_id(), b.storage_id());
        assert_eq!(a.storage_id(), again.storage_id());
    }

    #[test]
    fn test_locate_vanished_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = CliState::load(&dir.path().join("state.json")).unwrap();
        state.add_storage(dir.path(), &UserId::new("alice")).unwrap();
        let (_, relative) = state
            .locate(&dir.path().join("gone").join("b.jpg"))
            .unwrap()
            .unwrap();
        assert_eq!(relative, "gone/b.jpg");
        assert!(state.locate(Path::new("/definitely/elsewhere")).unwrap().is_none());
    }
}
