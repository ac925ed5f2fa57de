//! Startup-time configuration errors. All of these are meant to fail the
//! process before scanning begins, not to be recovered from.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error(
        "missing object-store credentials: set WASABI_ACCESS_KEY and WASABI_SECRET_KEY, \
         or add access_key/secret_key to the config file"
    )]
    MissingCredentials,

    #[error("failed to prepare directory for '{field}' at {path}: {reason}")]
    Directory {
        field: String,
        path: String,
        reason: String,
    },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
