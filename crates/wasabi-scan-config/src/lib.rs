// wasabi-scan-config - Layered runtime configuration (env > file > defaults)
//
// Modeled on this crate's configuration idiom: a partial, all-`Option`
// file representation merged under environment variables, with built-in
// defaults filling whatever neither source set. Validated once, at
// startup, so a misconfigured deployment fails before it starts scanning.

pub mod error;

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

pub use error::{ConfigError, Result};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_MAX_WORKERS: usize = 50;
const DEFAULT_MAX_BATCH: usize = 200;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
const DEFAULT_IDLE_SLEEP_MAX_SECS: u64 = 60;
const DEFAULT_IDLE_TICK_SECS: u64 = 1;
const DEFAULT_STATE_DIR: &str = "./state";
const DEFAULT_RECONCILIATION_DIR: &str = "./incoming";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Fully resolved, validated configuration the rest of the workspace runs
/// against.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub access_key: String,
    pub secret_key: String,
    pub default_region: String,

    pub max_workers: usize,
    pub max_batch: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,

    pub idle_sleep_max_secs: u64,
    pub idle_tick_secs: u64,

    /// Directory holding `processed_files.json` and `processing_log.json`.
    pub state_dir: PathBuf,
    /// Directory watched by the reconciliation scanner.
    pub reconciliation_dir: PathBuf,

    pub listen_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl RuntimeConfig {
    pub fn processed_files_path(&self) -> PathBuf {
        self.state_dir.join("processed_files.json")
    }

    pub fn processing_log_path(&self) -> PathBuf {
        self.state_dir.join("processing_log.json")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct FileConfig {
    access_key: Option<String>,
    secret_key: Option<String>,
    default_region: Option<String>,
    max_workers: Option<usize>,
    max_batch: Option<usize>,
    max_retries: Option<u32>,
    retry_delay_secs: Option<u64>,
    idle_sleep_max_secs: Option<u64>,
    idle_tick_secs: Option<u64>,
    state_dir: Option<String>,
    reconciliation_dir: Option<String>,
    listen_addr: Option<String>,
    log_level: Option<String>,
    log_format: Option<String>,
}

/// Resolves configuration from the environment, an optional file, and
/// built-in defaults, then validates and prepares it.
pub fn load() -> Result<RuntimeConfig> {
    let file = load_file_config()?;
    build(file, |name| env::var(name).ok())
}

fn load_file_config() -> Result<FileConfig> {
    let Some(path) = config_file_path() else {
        return Ok(FileConfig::default());
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let parsed: FileConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    info!("loaded config file {}", path.display());
    Ok(parsed)
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("WASABI_SCAN_CONFIG") {
        return Some(PathBuf::from(path));
    }
    for candidate in ["config.toml", ".wasabi-scan.toml"] {
        if Path::new(candidate).exists() {
            return Some(PathBuf::from(candidate));
        }
    }
    None
}

/// Builds and validates a `RuntimeConfig` from a parsed file plus an
/// environment-lookup function, so tests can substitute a fake
/// environment instead of touching real process env vars.
fn build(file: FileConfig, env_lookup: impl Fn(&str) -> Option<String>) -> Result<RuntimeConfig> {
    let access_key = env_lookup("WASABI_ACCESS_KEY")
        .or(file.access_key)
        .ok_or(ConfigError::MissingCredentials)?;
    let secret_key = env_lookup("WASABI_SECRET_KEY")
        .or(file.secret_key)
        .ok_or(ConfigError::MissingCredentials)?;

    let default_region = file
        .default_region
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let max_workers = file.max_workers.unwrap_or(DEFAULT_MAX_WORKERS);
    let max_batch = file.max_batch.unwrap_or(DEFAULT_MAX_BATCH);
    let max_retries = file.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
    let retry_delay_secs = file.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS);
    let idle_sleep_max_secs = file
        .idle_sleep_max_secs
        .unwrap_or(DEFAULT_IDLE_SLEEP_MAX_SECS);
    let idle_tick_secs = file.idle_tick_secs.unwrap_or(DEFAULT_IDLE_TICK_SECS);

    if max_workers == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max_workers".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    if idle_tick_secs == 0 || idle_tick_secs > idle_sleep_max_secs.max(1) {
        return Err(ConfigError::InvalidValue {
            field: "idle_tick_secs".to_string(),
            reason: "must be positive and no greater than idle_sleep_max_secs".to_string(),
        });
    }

    let state_dir = prepare_dir(
        "state_dir",
        file.state_dir.as_deref().unwrap_or(DEFAULT_STATE_DIR),
    )?;
    let reconciliation_dir = prepare_dir(
        "reconciliation_dir",
        file.reconciliation_dir
            .as_deref()
            .unwrap_or(DEFAULT_RECONCILIATION_DIR),
    )?;

    let listen_addr = file
        .listen_addr
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    let log_level = file.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
    let log_format = match file.log_format.as_deref() {
        Some("json") => LogFormat::Json,
        Some("text") | None => LogFormat::Text,
        Some(other) => {
            warn!("unrecognized log_format '{other}', defaulting to text");
            LogFormat::Text
        }
    };

    Ok(RuntimeConfig {
        access_key,
        secret_key,
        default_region,
        max_workers,
        max_batch,
        max_retries,
        retry_delay_secs,
        idle_sleep_max_secs,
        idle_tick_secs,
        state_dir,
        reconciliation_dir,
        listen_addr,
        log_level,
        log_format,
    })
}

fn prepare_dir(field: &str, raw: &str) -> Result<PathBuf> {
    let path = PathBuf::from(raw);
    std::fs::create_dir_all(&path).map_err(|e| ConfigError::Directory {
        field: field.to_string(),
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(path)
}
