//! Error types for the operation log's disk mirror.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpLogError {
    #[error("failed to read operation log {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to write operation log {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OpLogError>;
