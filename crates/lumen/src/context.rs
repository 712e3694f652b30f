//! Collaborator bundle handed to every pipeline component.

use std::sync::Arc;

use lumen_store::{
    AccessResolver, ClusterStore, DetectionStore, FileStore, TagStore, WorkQueue,
};

#[derive(Clone)]
pub struct Collaborators {
    pub files: Arc<dyn FileStore>,
    pub access: Arc<dyn AccessResolver>,
    pub queue: Arc<dyn WorkQueue>,
    pub detections: Arc<dyn DetectionStore>,
    pub clusters: Arc<dyn ClusterStore>,
    pub tags: Arc<dyn TagStore>,
}

impl Collaborators {
    /// Wire a file store that also resolves access with a result store that
    /// implements every persistence interface.
    pub fn new<F, S>(files: Arc<F>, store: Arc<S>) -> Self
    where
        F: FileStore + AccessResolver + 'static,
        S: WorkQueue + DetectionStore + ClusterStore + TagStore + 'static,
    {
        Self {
            files: files.clone(),
            access: files,
            queue: store.clone(),
            detections: store.clone(),
            clusters: store.clone(),
            tags: store,
        }
    }
}
