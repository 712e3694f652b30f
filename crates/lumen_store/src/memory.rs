//! In-memory result store.
//!
//! Implements the queue, detection, cluster and tag collaborators behind one
//! mutex. The state can be saved to and restored from a JSON snapshot so
//! that separate CLI invocations share it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::ids::{ClusterId, DetectionId, FileId, UserId};
use crate::store::{ClusterStore, DetectionStore, TagStore, WorkQueue};
use crate::types::{Cluster, ClusterAssignment, Detection, NewDetection, WorkItem};

#[derive(Debug, Default)]
struct MemoryState {
    queue: BTreeMap<String, BTreeMap<FileId, WorkItem>>,
    detections: BTreeMap<DetectionId, Detection>,
    clusters: BTreeMap<ClusterId, Cluster>,
    tags: BTreeMap<FileId, BTreeSet<String>>,
    next_detection_id: u64,
    next_cluster_id: u64,
}

impl MemoryState {
    fn allocate_detection_id(&mut self) -> DetectionId {
        self.next_detection_id += 1;
        DetectionId::new(self.next_detection_id)
    }

    fn allocate_cluster_id(&mut self) -> ClusterId {
        self.next_cluster_id += 1;
        ClusterId::new(self.next_cluster_id)
    }
}

/// Serialized form of [`MemoryStore`]. Plain vectors keep the JSON free of
/// non-string map keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub work_items: Vec<WorkItem>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub tags: Vec<(FileId, Vec<String>)>,
    #[serde(default)]
    pub next_detection_id: u64,
    #[serde(default)]
    pub next_cluster_id: u64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        let mut state = MemoryState {
            next_detection_id: snapshot.next_detection_id,
            next_cluster_id: snapshot.next_cluster_id,
            ..MemoryState::default()
        };
        for item in snapshot.work_items {
            state
                .queue
                .entry(item.model.clone())
                .or_default()
                .insert(item.file_id, item);
        }
        for detection in snapshot.detections {
            state.next_detection_id = state.next_detection_id.max(detection.id.get());
            state.detections.insert(detection.id, detection);
        }
        for cluster in snapshot.clusters {
            state.next_cluster_id = state.next_cluster_id.max(cluster.id.get());
            state.clusters.insert(cluster.id, cluster);
        }
        for (file_id, tags) in snapshot.tags {
            state.tags.insert(file_id, tags.into_iter().collect());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> Result<MemorySnapshot> {
        let state = self.lock()?;
        Ok(MemorySnapshot {
            work_items: state
                .queue
                .values()
                .flat_map(|items| items.values().cloned())
                .collect(),
            detections: state.detections.values().cloned().collect(),
            clusters: state.clusters.values().cloned().collect(),
            tags: state
                .tags
                .iter()
                .map(|(id, tags)| (*id, tags.iter().cloned().collect()))
                .collect(),
            next_detection_id: state.next_detection_id,
            next_cluster_id: state.next_cluster_id,
        })
    }

    /// Load a snapshot file; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No store snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let snapshot: MemorySnapshot = serde_json::from_str(&content)?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot()?;
        let content = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Models with at least one queued item, with their queue depth.
    pub fn queue_depths(&self) -> Result<BTreeMap<String, usize>> {
        let state = self.lock()?;
        Ok(state
            .queue
            .iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(model, items)| (model.clone(), items.len()))
            .collect())
    }

    pub fn detection_count(&self) -> Result<usize> {
        Ok(self.lock()?.detections.len())
    }

    pub fn all_clusters(&self) -> Result<Vec<Cluster>> {
        Ok(self.lock()?.clusters.values().cloned().collect())
    }

    pub fn tagged_file_count(&self) -> Result<usize> {
        Ok(self.lock()?.tags.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl WorkQueue for MemoryStore {
    fn insert(&self, item: &WorkItem) -> Result<bool> {
        let mut state = self.lock()?;
        let queue = state.queue.entry(item.model.clone()).or_default();
        if queue.contains_key(&item.file_id) {
            return Ok(false);
        }
        queue.insert(item.file_id, item.clone());
        Ok(true)
    }

    fn remove(&self, item: &WorkItem) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .queue
            .get_mut(&item.model)
            .map(|queue| queue.remove(&item.file_id).is_some())
            .unwrap_or(false))
    }

    fn remove_all_for_file(&self, file_id: FileId) -> Result<usize> {
        let mut state = self.lock()?;
        let mut removed = 0;
        for queue in state.queue.values_mut() {
            if queue.remove(&file_id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn pending(&self, model: &str, limit: usize) -> Result<Vec<WorkItem>> {
        let state = self.lock()?;
        Ok(state
            .queue
            .get(model)
            .map(|queue| queue.values().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, model: &str) -> Result<usize> {
        let state = self.lock()?;
        Ok(state.queue.get(model).map(BTreeMap::len).unwrap_or(0))
    }

    fn contains(&self, model: &str, file_id: FileId) -> Result<bool> {
        let state = self.lock()?;
        Ok(state
            .queue
            .get(model)
            .map(|queue| queue.contains_key(&file_id))
            .unwrap_or(false))
    }
}

impl DetectionStore for MemoryStore {
    fn insert_detection(&self, detection: NewDetection) -> Result<DetectionId> {
        let mut state = self.lock()?;
        let id = state.allocate_detection_id();
        state.detections.insert(
            id,
            Detection {
                id,
                file_id: detection.file_id,
                user_id: detection.user_id,
                bbox: detection.bbox,
                vector: detection.vector,
                cluster: ClusterAssignment::Unclustered,
                threshold: 0.0,
            },
        );
        Ok(id)
    }

    fn update_detection(&self, detection: &Detection) -> Result<()> {
        let mut state = self.lock()?;
        match state.detections.get_mut(&detection.id) {
            Some(existing) => {
                *existing = detection.clone();
                Ok(())
            }
            None => Err(StoreError::DetectionNotFound(detection.id)),
        }
    }

    fn delete_detection(&self, id: DetectionId) -> Result<bool> {
        Ok(self.lock()?.detections.remove(&id).is_some())
    }

    fn delete_detections_for_file(&self, file_id: FileId) -> Result<usize> {
        let mut state = self.lock()?;
        let before = state.detections.len();
        state.detections.retain(|_, d| d.file_id != file_id);
        Ok(before - state.detections.len())
    }

    fn detection(&self, id: DetectionId) -> Result<Option<Detection>> {
        Ok(self.lock()?.detections.get(&id).cloned())
    }

    fn detections_for_file(&self, file_id: FileId) -> Result<Vec<Detection>> {
        let state = self.lock()?;
        Ok(state
            .detections
            .values()
            .filter(|d| d.file_id == file_id)
            .cloned()
            .collect())
    }

    fn detections_for_user(&self, user: &UserId) -> Result<Vec<Detection>> {
        let state = self.lock()?;
        Ok(state
            .detections
            .values()
            .filter(|d| &d.user_id == user)
            .cloned()
            .collect())
    }

    fn detections_for_cluster(&self, cluster_id: ClusterId) -> Result<Vec<Detection>> {
        let state = self.lock()?;
        Ok(state
            .detections
            .values()
            .filter(|d| d.cluster.cluster_id() == Some(cluster_id))
            .cloned()
            .collect())
    }

    fn rejected_detections_for_user(&self, user: &UserId) -> Result<Vec<Detection>> {
        let state = self.lock()?;
        Ok(state
            .detections
            .values()
            .filter(|d| &d.user_id == user && d.cluster.is_rejected())
            .cloned()
            .collect())
    }

    fn copy_detections(&self, from: &UserId, to: &UserId, file_id: FileId) -> Result<usize> {
        let mut state = self.lock()?;
        let sources: Vec<Detection> = state
            .detections
            .values()
            .filter(|d| d.file_id == file_id && &d.user_id == from)
            .cloned()
            .collect();
        for source in &sources {
            let id = state.allocate_detection_id();
            state.detections.insert(
                id,
                Detection {
                    id,
                    user_id: to.clone(),
                    cluster: ClusterAssignment::Unclustered,
                    threshold: 0.0,
                    ..source.clone()
                },
            );
        }
        Ok(sources.len())
    }

    fn prune_detections_not_in(&self, file_id: FileId, keep: &[UserId]) -> Result<usize> {
        let mut state = self.lock()?;
        let before = state.detections.len();
        state
            .detections
            .retain(|_, d| d.file_id != file_id || keep.contains(&d.user_id));
        Ok(before - state.detections.len())
    }
}

impl ClusterStore for MemoryStore {
    fn create_cluster(&self, user: &UserId, title: &str) -> Result<Cluster> {
        let mut state = self.lock()?;
        let id = state.allocate_cluster_id();
        let cluster = Cluster {
            id,
            user_id: user.clone(),
            title: title.to_string(),
        };
        state.clusters.insert(id, cluster.clone());
        Ok(cluster)
    }

    fn cluster(&self, id: ClusterId) -> Result<Option<Cluster>> {
        Ok(self.lock()?.clusters.get(&id).cloned())
    }

    fn clusters_for_user(&self, user: &UserId) -> Result<Vec<Cluster>> {
        let state = self.lock()?;
        Ok(state
            .clusters
            .values()
            .filter(|c| &c.user_id == user)
            .cloned()
            .collect())
    }

    fn rename_cluster(&self, id: ClusterId, title: &str) -> Result<()> {
        let mut state = self.lock()?;
        let cluster = state
            .clusters
            .get_mut(&id)
            .ok_or(StoreError::ClusterNotFound(id))?;
        cluster.title = title.to_string();
        Ok(())
    }

    fn delete_cluster(&self, id: ClusterId) -> Result<bool> {
        let mut state = self.lock()?;
        if state.clusters.remove(&id).is_none() {
            return Ok(false);
        }
        for detection in state.detections.values_mut() {
            if detection.cluster == ClusterAssignment::Member(id) {
                detection.cluster = ClusterAssignment::Unclustered;
            }
        }
        Ok(true)
    }
}

impl TagStore for MemoryStore {
    fn assign_tags(&self, file_id: FileId, tags: &[String]) -> Result<()> {
        let mut state = self.lock()?;
        state
            .tags
            .entry(file_id)
            .or_default()
            .extend(tags.iter().cloned());
        Ok(())
    }

    fn tags_for_file(&self, file_id: FileId) -> Result<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .tags
            .get(&file_id)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn tags_for_files(&self, file_ids: &[FileId]) -> Result<HashMap<FileId, Vec<String>>> {
        let state = self.lock()?;
        Ok(file_ids
            .iter()
            .map(|id| {
                let tags = state
                    .tags
                    .get(id)
                    .map(|tags| tags.iter().cloned().collect())
                    .unwrap_or_default();
                (*id, tags)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::StorageId;
    use crate::types::BoundingBox;

    fn item(model: &str, file: u64) -> WorkItem {
        WorkItem {
            model: model.to_string(),
            file_id: FileId::new(file),
            storage_id: StorageId::new(1),
            root_id: FileId::new(1),
            update: false,
        }
    }

    fn face(file: u64, user: &str) -> NewDetection {
        NewDetection {
            file_id: FileId::new(file),
            user_id: UserId::new(user),
            bbox: BoundingBox {
                x: 0.1,
                y: 0.1,
                width: 0.2,
                height: 0.2,
            },
            vector: vec![0.5, 0.5],
        }
    }

    #[test]
    fn test_queue_is_unique_per_model_and_file() {
        let store = MemoryStore::new();
        assert!(store.insert(&item("imagenet", 5)).unwrap());
        assert!(!store.insert(&item("imagenet", 5)).unwrap());
        assert!(store.insert(&item("faces", 5)).unwrap());
        assert_eq!(store.count("imagenet").unwrap(), 1);
        assert_eq!(store.remove_all_for_file(FileId::new(5)).unwrap(), 2);
        assert_eq!(store.count("faces").unwrap(), 0);
    }

    #[test]
    fn test_pending_respects_limit_and_order() {
        let store = MemoryStore::new();
        for file in [9, 3, 7] {
            store.insert(&item("imagenet", file)).unwrap();
        }
        let pending = store.pending("imagenet", 2).unwrap();
        let ids: Vec<u64> = pending.iter().map(|i| i.file_id.get()).collect();
        assert_eq!(ids, vec![3, 7]);
    }

    #[test]
    fn test_copy_and_prune_detections() {
        let store = MemoryStore::new();
        store.insert_detection(face(1, "alice")).unwrap();
        store.insert_detection(face(1, "alice")).unwrap();
        store.insert_detection(face(2, "alice")).unwrap();

        let copied = store
            .copy_detections(&UserId::new("alice"), &UserId::new("bob"), FileId::new(1))
            .unwrap();
        assert_eq!(copied, 2);
        assert_eq!(store.detections_for_user(&UserId::new("bob")).unwrap().len(), 2);

        let pruned = store
            .prune_detections_not_in(FileId::new(1), &[UserId::new("alice")])
            .unwrap();
        assert_eq!(pruned, 2);
        assert_eq!(store.detections_for_file(FileId::new(1)).unwrap().len(), 2);
        assert_eq!(store.detections_for_file(FileId::new(2)).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_cluster_unassigns_members() {
        let store = MemoryStore::new();
        let user = UserId::new("alice");
        let cluster = store.create_cluster(&user, "").unwrap();
        let id = store.insert_detection(face(1, "alice")).unwrap();
        let mut detection = store.detection(id).unwrap().unwrap();
        detection.cluster = ClusterAssignment::Member(cluster.id);
        store.update_detection(&detection).unwrap();

        assert!(store.delete_cluster(cluster.id).unwrap());
        let detection = store.detection(id).unwrap().unwrap();
        assert_eq!(detection.cluster, ClusterAssignment::Unclustered);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_id_counters() {
        let store = MemoryStore::new();
        store.insert(&item("faces", 4)).unwrap();
        store.insert_detection(face(4, "alice")).unwrap();
        store
            .assign_tags(FileId::new(4), &["cat".to_string()])
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        store.save(&path).unwrap();

        let restored = MemoryStore::load(&path).unwrap();
        assert!(restored.contains("faces", FileId::new(4)).unwrap());
        assert_eq!(restored.tags_for_file(FileId::new(4)).unwrap(), vec!["cat"]);
        let next = restored.insert_detection(face(4, "alice")).unwrap();
        assert_eq!(next, DetectionId::new(2));
    }
}
