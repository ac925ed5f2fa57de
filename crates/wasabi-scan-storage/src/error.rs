//! Error types for object-store access.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to list buckets: {0}")]
    ListBuckets(String),

    #[error("failed to resolve region for bucket '{bucket}': {reason}")]
    BucketRegion { bucket: String, reason: String },

    #[error("failed to list prefix '{prefix}' in bucket '{bucket}': {reason}")]
    ListPage {
        bucket: String,
        prefix: String,
        reason: String,
    },

    #[error("failed to download '{bucket}/{key}': {reason}")]
    Download {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("failed to upload '{bucket}/{key}': {reason}")]
    Upload {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
