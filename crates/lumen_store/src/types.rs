//! Core data model: file-store nodes, queue items, detections and clusters.

use serde::{Deserialize, Serialize};

use crate::ids::{ClusterId, DetectionId, FileId, StorageId, UserId};

/// Mime type reported for directories.
pub const DIRECTORY_MIME: &str = "inode/directory";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Directory,
}

/// A file or directory as seen through the file store.
///
/// `path` is relative to the storage root, `/`-separated, and empty for the
/// root itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: FileId,
    pub storage_id: StorageId,
    /// Id of the mount root this node was reached through
    pub root_id: FileId,
    /// Owner of the mount the node lives on
    pub owner: UserId,
    /// Whether the node is reached through a mount shared by another user
    pub shared_mount: bool,
    pub path: String,
    pub kind: NodeKind,
    pub mime: String,
    pub size: u64,
}

impl Node {
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Storage-relative path of the containing directory ("" for top level).
    pub fn parent_path(&self) -> &str {
        parent_of(&self.path)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// True if this node is `dir_path` itself or lies beneath it.
    pub fn is_within(&self, dir_path: &str) -> bool {
        is_within(&self.path, dir_path)
    }
}

/// Parent component of a storage-relative path.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Join a storage-relative directory path and an entry name.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// True if `path` equals `dir` or is nested under it. The root ("") contains
/// everything.
pub fn is_within(path: &str, dir: &str) -> bool {
    if dir.is_empty() || path == dir {
        return true;
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}

/// One pending (model, file) classification task. Unique on `(model, file_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub model: String,
    pub file_id: FileId,
    pub storage_id: StorageId,
    pub root_id: FileId,
    /// Set when the file was classified before and its content changed since
    pub update: bool,
}

impl WorkItem {
    pub fn for_node(model: &str, node: &Node, update: bool) -> Self {
        Self {
            model: model.to_string(),
            file_id: node.id,
            storage_id: node.storage_id,
            root_id: node.root_id,
            update,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Cluster membership of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state", content = "cluster_id")]
pub enum ClusterAssignment {
    /// Not yet clustered
    #[default]
    Unclustered,
    /// Explicitly removed from every cluster by the user
    Rejected,
    Member(ClusterId),
}

impl ClusterAssignment {
    pub fn cluster_id(self) -> Option<ClusterId> {
        match self {
            ClusterAssignment::Member(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_rejected(self) -> bool {
        matches!(self, ClusterAssignment::Rejected)
    }
}

/// One detected face, owned by one user with access to the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub file_id: FileId,
    pub user_id: UserId,
    pub bbox: BoundingBox,
    pub vector: Vec<f32>,
    pub cluster: ClusterAssignment,
    /// Distance threshold in effect when the detection was last clustered
    pub threshold: f64,
}

/// A detection about to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDetection {
    pub file_id: FileId,
    pub user_id: UserId,
    pub bbox: BoundingBox,
    pub vector: Vec<f32>,
}

/// A user-owned named group of detections believed to show the same person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub user_id: UserId,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_of("a/b/c.jpg"), "a/b");
        assert_eq!(parent_of("c.jpg"), "");
        assert_eq!(join_path("", "x"), "x");
        assert_eq!(join_path("a/b", "x"), "a/b/x");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("photos/2024/a.jpg", "photos"));
        assert!(is_within("photos", "photos"));
        assert!(is_within("anything", ""));
        assert!(!is_within("photos-old/a.jpg", "photos"));
        assert!(!is_within("pho", "photos"));
    }

    #[test]
    fn test_cluster_assignment_serde() {
        let json = serde_json::to_string(&ClusterAssignment::Member(ClusterId::new(3))).unwrap();
        assert_eq!(json, r#"{"state":"member","cluster_id":3}"#);
        let parsed: ClusterAssignment = serde_json::from_str(r#"{"state":"rejected"}"#).unwrap();
        assert!(parsed.is_rejected());
        assert_eq!(parsed.cluster_id(), None);
    }
}
