//! Lumen Cluster
//!
//! Groups feature vectors into identities with Chinese Whispers: vertices
//! are linked to every other vector within a radius (found through a ball
//! tree), then repeatedly adopt the most common label among their neighbors.

pub mod ball_tree;
pub mod error;
pub mod metric;
pub mod whispers;

pub use ball_tree::BallTree;
pub use error::{ClusterError, Result};
pub use metric::Metric;
pub use whispers::{ChineseWhispers, WhisperParams, WhisperVertex};
