//! Grouping face detections into per-user clusters.

mod clustering;

pub use clustering::{ClusterReport, FaceClusterer};
