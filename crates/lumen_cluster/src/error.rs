use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ClusterError {
    #[error("Vector {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Invalid clustering parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
