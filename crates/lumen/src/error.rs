//! Error types for the Lumen pipeline

use lumen_cluster::ClusterError;
use lumen_store::StoreError;
use lumen_worker::RunnerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LumenError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("Clustering error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unexpected result for file {file_id}: {message}")]
    InvalidResult { file_id: u64, message: String },
}

pub type Result<T> = std::result::Result<T, LumenError>;
