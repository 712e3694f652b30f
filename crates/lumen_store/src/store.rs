//! Collaborator interfaces.
//!
//! Persistence row mapping lives behind these traits. Every call is a single
//! atomic row operation; no transaction spans two calls.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::ids::{ClusterId, DetectionId, FileId, StorageId, UserId};
use crate::types::{Cluster, Detection, NewDetection, Node, WorkItem};

// ============================================================================
// Work Queue
// ============================================================================

/// Durable per-model set of pending classification work.
pub trait WorkQueue: Send + Sync {
    /// Queue an item under `item.model`. Returns false if `(model, file_id)`
    /// was already queued.
    fn insert(&self, item: &WorkItem) -> Result<bool>;
    /// Remove an item from `item.model`'s queue. Returns false if absent.
    fn remove(&self, item: &WorkItem) -> Result<bool>;
    /// Remove the file from every model's queue.
    fn remove_all_for_file(&self, file_id: FileId) -> Result<usize>;
    /// Up to `limit` pending items for `model`, oldest file ids first.
    fn pending(&self, model: &str, limit: usize) -> Result<Vec<WorkItem>>;
    fn count(&self, model: &str) -> Result<usize>;
    fn contains(&self, model: &str, file_id: FileId) -> Result<bool>;
}

// ============================================================================
// Detections & Clusters
// ============================================================================

pub trait DetectionStore: Send + Sync {
    fn insert_detection(&self, detection: NewDetection) -> Result<DetectionId>;
    fn update_detection(&self, detection: &Detection) -> Result<()>;
    fn delete_detection(&self, id: DetectionId) -> Result<bool>;
    fn delete_detections_for_file(&self, file_id: FileId) -> Result<usize>;

    fn detection(&self, id: DetectionId) -> Result<Option<Detection>>;
    fn detections_for_file(&self, file_id: FileId) -> Result<Vec<Detection>>;
    fn detections_for_user(&self, user: &UserId) -> Result<Vec<Detection>>;
    fn detections_for_cluster(&self, cluster_id: ClusterId) -> Result<Vec<Detection>>;
    fn rejected_detections_for_user(&self, user: &UserId) -> Result<Vec<Detection>>;

    /// Copy `from`'s detections of `file_id` to `to`, unclustered. Returns
    /// the number of rows created.
    fn copy_detections(&self, from: &UserId, to: &UserId, file_id: FileId) -> Result<usize>;
    /// Delete the file's detections belonging to users not in `keep`.
    fn prune_detections_not_in(&self, file_id: FileId, keep: &[UserId]) -> Result<usize>;
}

pub trait ClusterStore: Send + Sync {
    fn create_cluster(&self, user: &UserId, title: &str) -> Result<Cluster>;
    fn cluster(&self, id: ClusterId) -> Result<Option<Cluster>>;
    fn clusters_for_user(&self, user: &UserId) -> Result<Vec<Cluster>>;
    fn rename_cluster(&self, id: ClusterId, title: &str) -> Result<()>;
    fn delete_cluster(&self, id: ClusterId) -> Result<bool>;
}

// ============================================================================
// Tags
// ============================================================================

pub trait TagStore: Send + Sync {
    /// Attach tags to the file. Existing tags are kept.
    fn assign_tags(&self, file_id: FileId, tags: &[String]) -> Result<()>;
    fn tags_for_file(&self, file_id: FileId) -> Result<Vec<String>>;
    fn tags_for_files(&self, file_ids: &[FileId]) -> Result<HashMap<FileId, Vec<String>>>;
}

// ============================================================================
// File Store & Access
// ============================================================================

pub trait FileStore: Send + Sync {
    fn node(&self, id: FileId) -> Result<Option<Node>>;
    fn node_by_path(&self, storage_id: StorageId, path: &str) -> Result<Option<Node>>;
    /// Direct children of a directory.
    fn children(&self, folder: &Node) -> Result<Vec<Node>>;
    /// Whether an entry named `name` exists directly inside `folder`.
    fn child_exists(&self, folder: &Node, name: &str) -> Result<bool>;
    /// Storage-relative paths of every directory holding one of `markers`.
    fn marker_directories(&self, storage_id: StorageId, markers: &[String]) -> Result<Vec<String>>;
    /// Absolute local path of a file, or None if the file has vanished.
    fn local_path(&self, id: FileId) -> Result<Option<PathBuf>>;
}

pub trait AccessResolver: Send + Sync {
    /// Users currently able to reach the file through any mount.
    fn users_with_access(&self, file_id: FileId) -> Result<Vec<UserId>>;
}
