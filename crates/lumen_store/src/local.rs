//! File store backed by a local directory tree.
//!
//! Presents one directory as a single storage owned by one user. File ids are
//! assigned on first sight and kept in a registry keyed by relative path, so
//! they stay stable across invocations once the registry is persisted. The
//! registry also remembers entries that have since disappeared from disk,
//! which lets deletions be processed after the fact.
//!
//! Ids carry the storage id in their upper 32 bits so several local stores
//! can feed one result store without collisions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, StoreError};
use crate::ids::{FileId, StorageId, UserId};
use crate::store::{AccessResolver, FileStore};
use crate::types::{is_within, join_path, parent_of, Node, NodeKind, DIRECTORY_MIME};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub id: FileId,
    pub path: String,
    pub kind: NodeKind,
}

/// Persisted path → id assignments of a [`LocalFileStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalRegistry {
    #[serde(default)]
    pub entries: Vec<LocalEntry>,
    #[serde(default)]
    pub next_id: u64,
}

const LOCAL_ID_BITS: u32 = 32;
const LOCAL_ID_MASK: u64 = (1 << LOCAL_ID_BITS) - 1;

#[derive(Debug, Default)]
struct Index {
    by_path: BTreeMap<String, LocalEntry>,
    paths: BTreeMap<FileId, String>,
    base: u64,
    next_id: u64,
}

impl Index {
    fn ensure(&mut self, path: &str, kind: NodeKind) -> FileId {
        if let Some(entry) = self.by_path.get_mut(path) {
            entry.kind = kind;
            return entry.id;
        }
        self.next_id += 1;
        let id = FileId::new(self.base | self.next_id);
        self.by_path.insert(
            path.to_string(),
            LocalEntry {
                id,
                path: path.to_string(),
                kind,
            },
        );
        self.paths.insert(id, path.to_string());
        id
    }

    fn insert(&mut self, entry: LocalEntry) {
        self.next_id = self.next_id.max(entry.id.get() & LOCAL_ID_MASK);
        self.paths.insert(entry.id, entry.path.clone());
        self.by_path.insert(entry.path.clone(), entry);
    }

    fn subtree(&self, path: &str) -> Vec<LocalEntry> {
        self.by_path
            .values()
            .filter(|e| is_within(&e.path, path))
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub struct LocalFileStore {
    root: PathBuf,
    storage_id: StorageId,
    owner: UserId,
    index: Mutex<Index>,
}

impl LocalFileStore {
    pub fn open(
        root: impl Into<PathBuf>,
        storage_id: StorageId,
        owner: UserId,
        registry: LocalRegistry,
    ) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::NotADirectory(root.display().to_string()));
        }
        let mut index = Index {
            base: storage_id.get() << LOCAL_ID_BITS,
            next_id: registry.next_id,
            ..Index::default()
        };
        for entry in registry.entries {
            index.insert(entry);
        }
        index.ensure("", NodeKind::Directory);
        Ok(Self {
            root,
            storage_id,
            owner,
            index: Mutex::new(index),
        })
    }

    /// Storage a local file id was issued by.
    pub fn storage_of(id: FileId) -> StorageId {
        StorageId::new(id.get() >> LOCAL_ID_BITS)
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    pub fn registry(&self) -> Result<LocalRegistry> {
        let index = self.lock()?;
        Ok(LocalRegistry {
            entries: index.by_path.values().cloned().collect(),
            next_id: index.next_id,
        })
    }

    pub fn root_node(&self) -> Result<Node> {
        self.node_by_path(self.storage_id, "")?
            .ok_or_else(|| StoreError::NotADirectory(self.root.display().to_string()))
    }

    /// Storage-relative form of an absolute or root-relative path.
    pub fn relative_path(&self, path: &Path) -> Result<String> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| StoreError::OutsideRoot(path.display().to_string()))?
        } else {
            path
        };
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(StoreError::OutsideRoot(path.display().to_string())),
            }
        }
        Ok(parts.join("/"))
    }

    /// Re-point registry entries after `from` was renamed to `to` on disk.
    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut index = self.lock()?;
        for mut entry in index.subtree(from) {
            index.by_path.remove(&entry.path);
            entry.path = format!("{}{}", to, &entry.path[from.len()..]);
            index.insert(entry);
        }
        Ok(())
    }

    /// Drop registry entries for a removed subtree.
    pub fn forget(&self, path: &str) -> Result<usize> {
        let mut index = self.lock()?;
        let gone = index.subtree(path);
        for entry in &gone {
            index.by_path.remove(&entry.path);
            index.paths.remove(&entry.id);
        }
        Ok(gone.len())
    }

    fn build_node(&self, id: FileId, path: &str, kind: NodeKind, size: u64) -> Result<Node> {
        let root_id = self
            .lock()?
            .by_path
            .get("")
            .map(|e| e.id)
            .unwrap_or(id);
        Ok(Node {
            id,
            storage_id: self.storage_id,
            root_id,
            owner: self.owner.clone(),
            shared_mount: false,
            path: path.to_string(),
            kind,
            mime: guess_mime(path, kind),
            size,
        })
    }

    /// Node for `path`, refreshed from disk when present there.
    fn load(&self, path: &str) -> Result<Option<Node>> {
        let abs = self.root.join(path);
        match fs::symlink_metadata(&abs) {
            Ok(meta) => {
                let kind = if meta.is_dir() {
                    NodeKind::Directory
                } else {
                    NodeKind::File
                };
                let id = self.lock()?.ensure(path, kind);
                let size = if meta.is_dir() { 0 } else { meta.len() };
                self.build_node(id, path, kind, size).map(Some)
            }
            Err(_) => {
                let entry = self.lock()?.by_path.get(path).cloned();
                match entry {
                    Some(entry) => self.build_node(entry.id, path, entry.kind, 0).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Index>> {
        self.index.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn guess_mime(path: &str, kind: NodeKind) -> String {
    match kind {
        NodeKind::Directory => DIRECTORY_MIME.to_string(),
        NodeKind::File => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

impl FileStore for LocalFileStore {
    fn node(&self, id: FileId) -> Result<Option<Node>> {
        let path = self.lock()?.paths.get(&id).cloned();
        match path {
            Some(path) => self.load(&path),
            None => Ok(None),
        }
    }

    fn node_by_path(&self, storage_id: StorageId, path: &str) -> Result<Option<Node>> {
        if storage_id != self.storage_id {
            return Ok(None);
        }
        self.load(path)
    }

    fn children(&self, folder: &Node) -> Result<Vec<Node>> {
        let abs = self.root.join(&folder.path);
        if !abs.exists() {
            let known: Vec<LocalEntry> = self
                .lock()?
                .by_path
                .values()
                .filter(|e| !e.path.is_empty() && parent_of(&e.path) == folder.path)
                .cloned()
                .collect();
            return known
                .into_iter()
                .map(|e| self.build_node(e.id, &e.path, e.kind, 0))
                .collect();
        }

        let listing = fs::read_dir(&abs).map_err(|e| StoreError::Listing {
            path: folder.path.clone(),
            message: e.to_string(),
        })?;
        let mut children = Vec::new();
        for entry in listing {
            let entry = entry.map_err(|e| StoreError::Listing {
                path: folder.path.clone(),
                message: e.to_string(),
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = join_path(&folder.path, &name);
            if let Some(node) = self.load(&path)? {
                children.push(node);
            }
        }
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    fn child_exists(&self, folder: &Node, name: &str) -> Result<bool> {
        Ok(self.root.join(&folder.path).join(name).exists())
    }

    fn marker_directories(&self, storage_id: StorageId, markers: &[String]) -> Result<Vec<String>> {
        if storage_id != self.storage_id || markers.is_empty() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry while looking for markers");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !markers.iter().any(|m| m.as_str() == name) {
                continue;
            }
            if let Some(parent) = entry.path().parent() {
                dirs.push(self.relative_path(parent)?);
            }
        }
        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }

    fn local_path(&self, id: FileId) -> Result<Option<PathBuf>> {
        let path = self.lock()?.paths.get(&id).cloned();
        Ok(path
            .map(|p| self.root.join(p))
            .filter(|abs| abs.is_file()))
    }
}

impl AccessResolver for LocalFileStore {
    fn users_with_access(&self, _file_id: FileId) -> Result<Vec<UserId>> {
        Ok(vec![self.owner.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &Path) -> LocalFileStore {
        LocalFileStore::open(
            dir,
            StorageId::new(1),
            UserId::new("alice"),
            LocalRegistry::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_ids_are_stable_across_registry_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("photos")).unwrap();
        fs::write(dir.path().join("photos/cat.jpg"), b"jpg").unwrap();

        let store = open(dir.path());
        let photos = store.node_by_path(StorageId::new(1), "photos").unwrap().unwrap();
        let children = store.children(&photos).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].mime, "image/jpeg");
        assert_eq!(children[0].size, 3);

        let registry = store.registry().unwrap();
        let reopened = LocalFileStore::open(
            dir.path(),
            StorageId::new(1),
            UserId::new("alice"),
            registry,
        )
        .unwrap();
        let again = reopened
            .node_by_path(StorageId::new(1), "photos/cat.jpg")
            .unwrap()
            .unwrap();
        assert_eq!(again.id, children[0].id);
        assert_eq!(LocalFileStore::storage_of(again.id), StorageId::new(1));
    }

    #[test]
    fn test_deleted_entries_remain_listable_until_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("album")).unwrap();
        fs::write(dir.path().join("album/a.png"), b"png").unwrap();

        let store = open(dir.path());
        let album = store.node_by_path(StorageId::new(1), "album").unwrap().unwrap();
        let file = store.children(&album).unwrap().remove(0);
        assert!(store.local_path(file.id).unwrap().is_some());

        fs::remove_dir_all(dir.path().join("album")).unwrap();
        assert!(store.local_path(file.id).unwrap().is_none());
        let remembered = store.children(&album).unwrap();
        assert_eq!(remembered.len(), 1);
        assert_eq!(remembered[0].id, file.id);

        assert_eq!(store.forget("album").unwrap(), 2);
        assert!(store.node(file.id).unwrap().is_none());
    }

    #[test]
    fn test_marker_directories_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/.noimage"), b"").unwrap();
        fs::write(dir.path().join("a/b/x.jpg"), b"x").unwrap();

        let store = open(dir.path());
        let dirs = store
            .marker_directories(StorageId::new(1), &[".noimage".to_string()])
            .unwrap();
        assert_eq!(dirs, vec!["a/b".to_string()]);

        let x = store.node_by_path(StorageId::new(1), "a/b/x.jpg").unwrap().unwrap();
        fs::rename(dir.path().join("a/b"), dir.path().join("c")).unwrap();
        store.rename("a/b", "c").unwrap();
        let moved = store.node(x.id).unwrap().unwrap();
        assert_eq!(moved.path, "c/x.jpg");
    }
}
