//! In-memory file store with users, storages and shares.
//!
//! Nodes live in one map keyed by id. Shares grant a user access to a node
//! and everything beneath it.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, StoreError};
use crate::ids::{FileId, StorageId, UserId};
use crate::store::{AccessResolver, FileStore};
use crate::types::{is_within, join_path, Node, NodeKind, DIRECTORY_MIME};

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<FileId, Node>,
    roots: BTreeMap<StorageId, FileId>,
    shares: BTreeMap<FileId, BTreeSet<UserId>>,
    unreadable: HashSet<FileId>,
    next_file_id: u64,
    next_storage_id: u64,
}

impl Tree {
    fn find(&self, storage_id: StorageId, path: &str) -> Option<&Node> {
        self.nodes
            .values()
            .find(|n| n.storage_id == storage_id && n.path == path)
    }

    fn get(&self, id: FileId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(StoreError::NodeNotFound(id))
    }

    fn subtree_ids(&self, node: &Node) -> Vec<FileId> {
        self.nodes
            .values()
            .filter(|n| n.storage_id == node.storage_id && n.is_within(&node.path))
            .map(|n| n.id)
            .collect()
    }
}

#[derive(Debug)]
pub struct MemoryFileStore {
    tree: Mutex<Tree>,
    mount_base: PathBuf,
}

impl Default for MemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::with_mount_base(PathBuf::from("/srv/lumen"))
    }

    /// Local paths resolve to `<mount_base>/<storage_id>/<path>`.
    pub fn with_mount_base(mount_base: PathBuf) -> Self {
        Self {
            tree: Mutex::new(Tree::default()),
            mount_base,
        }
    }

    /// Create a storage owned by `owner` and return its root directory.
    pub fn add_storage(&self, owner: &UserId) -> Result<Node> {
        let mut tree = self.lock()?;
        tree.next_storage_id += 1;
        tree.next_file_id += 1;
        let storage_id = StorageId::new(tree.next_storage_id);
        let id = FileId::new(tree.next_file_id);
        let root = Node {
            id,
            storage_id,
            root_id: id,
            owner: owner.clone(),
            shared_mount: false,
            path: String::new(),
            kind: NodeKind::Directory,
            mime: DIRECTORY_MIME.to_string(),
            size: 0,
        };
        tree.roots.insert(storage_id, id);
        tree.nodes.insert(id, root.clone());
        Ok(root)
    }

    pub fn add_dir(&self, parent: &Node, name: &str) -> Result<Node> {
        self.add_node(parent, name, NodeKind::Directory, DIRECTORY_MIME, 0)
    }

    pub fn add_file(&self, parent: &Node, name: &str, mime: &str, size: u64) -> Result<Node> {
        self.add_node(parent, name, NodeKind::File, mime, size)
    }

    fn add_node(
        &self,
        parent: &Node,
        name: &str,
        kind: NodeKind,
        mime: &str,
        size: u64,
    ) -> Result<Node> {
        if !parent.is_dir() {
            return Err(StoreError::NotADirectory(parent.path.clone()));
        }
        let mut tree = self.lock()?;
        let path = join_path(&parent.path, name);
        if let Some(existing) = tree.find(parent.storage_id, &path) {
            return Ok(existing.clone());
        }
        tree.next_file_id += 1;
        let node = Node {
            id: FileId::new(tree.next_file_id),
            storage_id: parent.storage_id,
            root_id: parent.root_id,
            owner: parent.owner.clone(),
            shared_mount: parent.shared_mount,
            path,
            kind,
            mime: mime.to_string(),
            size,
        };
        tree.nodes.insert(node.id, node.clone());
        Ok(node)
    }

    /// Remove a node and its subtree.
    pub fn remove(&self, id: FileId) -> Result<()> {
        let mut tree = self.lock()?;
        let node = tree.get(id)?.clone();
        for child in tree.subtree_ids(&node) {
            tree.nodes.remove(&child);
            tree.shares.remove(&child);
        }
        Ok(())
    }

    /// Move a node (and its subtree) below `new_parent` as `new_name`. Ids
    /// are preserved.
    pub fn rename(&self, id: FileId, new_parent: &Node, new_name: &str) -> Result<Node> {
        let mut tree = self.lock()?;
        let node = tree.get(id)?.clone();
        let target = join_path(&new_parent.path, new_name);
        for child in tree.subtree_ids(&node) {
            if let Some(entry) = tree.nodes.get_mut(&child) {
                let suffix = entry.path[node.path.len()..].to_string();
                entry.path = format!("{}{}", target, suffix);
                entry.storage_id = new_parent.storage_id;
                entry.root_id = new_parent.root_id;
                entry.owner = new_parent.owner.clone();
            }
        }
        tree.get(id).cloned()
    }

    pub fn share(&self, id: FileId, user: &UserId) -> Result<()> {
        let mut tree = self.lock()?;
        tree.get(id)?;
        tree.shares.entry(id).or_default().insert(user.clone());
        Ok(())
    }

    pub fn unshare(&self, id: FileId, user: &UserId) -> Result<()> {
        let mut tree = self.lock()?;
        if let Some(users) = tree.shares.get_mut(&id) {
            users.remove(user);
        }
        Ok(())
    }

    /// Make listing `id` fail, simulating an unreadable directory.
    pub fn set_unreadable(&self, id: FileId) -> Result<()> {
        self.lock()?.unreadable.insert(id);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tree>> {
        self.tree.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl FileStore for MemoryFileStore {
    fn node(&self, id: FileId) -> Result<Option<Node>> {
        Ok(self.lock()?.nodes.get(&id).cloned())
    }

    fn node_by_path(&self, storage_id: StorageId, path: &str) -> Result<Option<Node>> {
        Ok(self.lock()?.find(storage_id, path).cloned())
    }

    fn children(&self, folder: &Node) -> Result<Vec<Node>> {
        let tree = self.lock()?;
        if tree.unreadable.contains(&folder.id) {
            return Err(StoreError::Listing {
                path: folder.path.clone(),
                message: "permission denied".to_string(),
            });
        }
        if !folder.is_dir() {
            return Err(StoreError::NotADirectory(folder.path.clone()));
        }
        Ok(tree
            .nodes
            .values()
            .filter(|n| {
                n.storage_id == folder.storage_id
                    && n.id != folder.id
                    && n.parent_path() == folder.path
            })
            .cloned()
            .collect())
    }

    fn child_exists(&self, folder: &Node, name: &str) -> Result<bool> {
        let tree = self.lock()?;
        let path = join_path(&folder.path, name);
        Ok(tree.find(folder.storage_id, &path).is_some())
    }

    fn marker_directories(&self, storage_id: StorageId, markers: &[String]) -> Result<Vec<String>> {
        let tree = self.lock()?;
        let mut dirs: Vec<String> = tree
            .nodes
            .values()
            .filter(|n| n.storage_id == storage_id && n.is_file())
            .filter(|n| markers.iter().any(|m| m == n.name()))
            .map(|n| n.parent_path().to_string())
            .collect();
        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }

    fn local_path(&self, id: FileId) -> Result<Option<PathBuf>> {
        let tree = self.lock()?;
        Ok(tree.nodes.get(&id).map(|node| {
            self.mount_base
                .join(node.storage_id.to_string())
                .join(&node.path)
        }))
    }
}

impl AccessResolver for MemoryFileStore {
    fn users_with_access(&self, file_id: FileId) -> Result<Vec<UserId>> {
        let tree = self.lock()?;
        let node = tree.get(file_id)?;
        let mut users = BTreeSet::new();
        users.insert(node.owner.clone());
        for (shared_id, grantees) in &tree.shares {
            let Some(shared) = tree.nodes.get(shared_id) else {
                continue;
            };
            if shared.storage_id == node.storage_id && is_within(&node.path, &shared.path) {
                users.extend(grantees.iter().cloned());
            }
        }
        Ok(users.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_and_markers() {
        let store = MemoryFileStore::new();
        let alice = UserId::new("alice");
        let root = store.add_storage(&alice).unwrap();
        let photos = store.add_dir(&root, "photos").unwrap();
        store.add_file(&photos, "a.jpg", "image/jpeg", 10).unwrap();
        store.add_file(&photos, ".nomedia", "application/octet-stream", 0).unwrap();
        let nested = store.add_dir(&photos, "nested").unwrap();
        store.add_file(&nested, "b.jpg", "image/jpeg", 10).unwrap();

        let names: Vec<String> = store
            .children(&photos)
            .unwrap()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(store.child_exists(&photos, ".nomedia").unwrap());
        assert!(!store.child_exists(&nested, ".nomedia").unwrap());

        let dirs = store
            .marker_directories(root.storage_id, &[".nomedia".to_string()])
            .unwrap();
        assert_eq!(dirs, vec!["photos".to_string()]);
    }

    #[test]
    fn test_share_grants_subtree_access() {
        let store = MemoryFileStore::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let root = store.add_storage(&alice).unwrap();
        let shared = store.add_dir(&root, "shared").unwrap();
        let inside = store.add_file(&shared, "a.jpg", "image/jpeg", 1).unwrap();
        let outside = store.add_file(&root, "b.jpg", "image/jpeg", 1).unwrap();

        store.share(shared.id, &bob).unwrap();
        assert_eq!(
            store.users_with_access(inside.id).unwrap(),
            vec![alice.clone(), bob.clone()]
        );
        assert_eq!(store.users_with_access(outside.id).unwrap(), vec![alice.clone()]);

        store.unshare(shared.id, &bob).unwrap();
        assert_eq!(store.users_with_access(inside.id).unwrap(), vec![alice]);
    }

    #[test]
    fn test_rename_moves_subtree_and_keeps_ids() {
        let store = MemoryFileStore::new();
        let root = store.add_storage(&UserId::new("alice")).unwrap();
        let a = store.add_dir(&root, "a").unwrap();
        let b = store.add_dir(&root, "b").unwrap();
        let file = store.add_file(&a, "x.jpg", "image/jpeg", 1).unwrap();

        store.rename(a.id, &b, "moved").unwrap();
        let file = store.node(file.id).unwrap().unwrap();
        assert_eq!(file.path, "b/moved/x.jpg");
    }

    #[test]
    fn test_unreadable_directory_fails_listing() {
        let store = MemoryFileStore::new();
        let root = store.add_storage(&UserId::new("alice")).unwrap();
        let dir = store.add_dir(&root, "locked").unwrap();
        store.set_unreadable(dir.id).unwrap();
        assert!(matches!(
            store.children(&dir),
            Err(StoreError::Listing { .. })
        ));
    }
}
