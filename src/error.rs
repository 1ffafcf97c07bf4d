//! Error types for label volume operations

use crate::types::DataType;
use thiserror::Error;

/// Main error type for label volume operations
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Dtype mismatch: expected {expected}, found {found}")]
    DtypeMismatch { expected: DataType, found: DataType },

    #[error("Unable to read dataset {path}: {reason}")]
    DatasetRead { path: String, reason: String },

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Storage backend error: {0}")]
    StorageBackend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Specialized Result type for label volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;

impl From<serde_json::Error> for VolumeError {
    fn from(err: serde_json::Error) -> Self {
        VolumeError::Serialization(err.to_string())
    }
}
