//! Error types for the store collaborators

use std::io;
use thiserror::Error;

use crate::ids::{ClusterId, DetectionId, FileId};

/// Store error type
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node not found: {0}")]
    NodeNotFound(FileId),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Detection not found: {0}")]
    DetectionNotFound(DetectionId),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(ClusterId),

    #[error("Path is outside the storage root: {0}")]
    OutsideRoot(String),

    #[error("Directory listing failed for '{path}': {message}")]
    Listing { path: String, message: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StoreError>;
