//! Lumen Store
//!
//! Data model and the collaborator interfaces the classification pipeline
//! talks to: the work queue, detection/cluster/tag persistence, the file
//! store and access resolution. Ships an in-memory implementation of every
//! interface plus a file store backed by a local directory.

pub mod error;
pub mod ids;
pub mod local;
pub mod memory;
pub mod memory_fs;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use ids::{ClusterId, DetectionId, FileId, IdParseError, StorageId, UserId};
pub use local::{LocalEntry, LocalFileStore, LocalRegistry};
pub use memory::{MemorySnapshot, MemoryStore};
pub use memory_fs::MemoryFileStore;
pub use store::{AccessResolver, ClusterStore, DetectionStore, FileStore, TagStore, WorkQueue};
pub use types::{
    is_within, join_path, parent_of, BoundingBox, Cluster, ClusterAssignment, Detection,
    NewDetection, Node, NodeKind, WorkItem, DIRECTORY_MIME,
};
