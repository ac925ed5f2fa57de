//! Error types for the durable progress store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("failed to read progress file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to write progress file {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProgressError>;
