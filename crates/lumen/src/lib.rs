//! Lumen
//!
//! Media classification pipeline. Eligible files are discovered and queued
//! per model, models run as child processes fed through the
//! [`lumen_worker::ClassifierRunner`], their results become tags or face
//! detections, and face detections are grouped into per-user clusters. The
//! [`consistency::ConsistencyMaintainer`] keeps queues and detections in step
//! with file-system changes.

pub mod classify;
pub mod config;
pub mod consistency;
pub mod context;
pub mod discovery;
pub mod error;
pub mod faces;
pub mod modality;

pub use classify::{build_classifier, build_job, ClassificationJob, Classifier, RunReport};
pub use config::LumenConfig;
pub use consistency::{ConsistencyMaintainer, FileEvent};
pub use context::Collaborators;
pub use discovery::{CrawlStats, EligibilityFilter, Finder, IgnoreCache, TreeCrawler};
pub use error::{LumenError, Result};
pub use faces::{ClusterReport, FaceClusterer};
pub use modality::Modality;
