// wasabi-scan-progress - Durable record of per-file processing outcomes
//
// A single JSON file (`processed_files.json`), rewritten atomically on
// every mutation. Keyed by (path, operation); once a key is recorded,
// recording it again is a no-op.

pub mod error;

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;
use wasabi_scan_core::{Operation, ProcessedRecord};

pub use error::{ProgressError, Result};

fn map_key(path: &str, operation: Operation) -> (String, Operation) {
    (path.to_string(), operation)
}

/// Durable `(path, operation) -> ProcessedRecord` store.
///
/// Writers are serialized by the mutex guarding the in-memory map; the
/// disk mirror is rewritten while the lock is held, so a failed write
/// never leaves the in-memory and on-disk views disagreeing about what
/// was durably recorded.
pub struct ProgressStore {
    path: PathBuf,
    records: Mutex<HashMap<(String, Operation), ProcessedRecord>>,
}

impl ProgressStore {
    /// Loads `path`, creating an empty store if it doesn't exist yet.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let rows: Vec<ProcessedRecord> =
                    serde_json::from_slice(&bytes).map_err(|e| ProgressError::Read {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                rows.into_iter()
                    .map(|r| (map_key(&r.path, r.operation), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(ProgressError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let store = Self {
            path,
            records: Mutex::new(records),
        };
        if !store.path.exists() {
            store.persist(&store.records.lock().await).await?;
        }
        Ok(store)
    }

    pub async fn has(&self, path: &str, operation: Operation) -> bool {
        self.records.lock().await.contains_key(&map_key(path, operation))
    }

    /// Records `operation` for `path`. Idempotent: a key already present
    /// is left untouched (first write wins) and no disk write happens.
    pub async fn record(
        &self,
        path: impl Into<String>,
        operation: Operation,
        local_identifier: Option<String>,
    ) -> Result<()> {
        let path = path.into();
        let mut records = self.records.lock().await;
        let key = map_key(&path, operation);
        if records.contains_key(&key) {
            return Ok(());
        }
        records.insert(
            key,
            ProcessedRecord {
                path,
                operation,
                processed_at: Utc::now(),
                local_identifier,
            },
        );
        self.persist(&records).await
    }

    /// First `downloaded` record whose path contains `needle`, used by
    /// the reconciliation scanner to recover the original source key.
    pub async fn find_downloaded_containing(&self, needle: &str) -> Option<ProcessedRecord> {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.operation == Operation::Downloaded)
            .find(|r| r.path.contains(needle))
            .cloned()
    }

    async fn persist(&self, records: &HashMap<(String, Operation), ProcessedRecord>) -> Result<()> {
        let mut rows: Vec<&ProcessedRecord> = records.values().collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        let bytes = serde_json::to_vec_pretty(&rows).map_err(|e| ProgressError::Write {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .expect("progress store write task panicked")
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)?;
    }
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| {
        warn!("atomic rename of progress store failed: {e}");
        ProgressError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_is_idempotent_and_persists_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_files.json");

        let store = ProgressStore::load(&path).await.unwrap();
        assert!(!store.has("b/a.mp3", Operation::Downloaded).await);

        store
            .record("b/a.mp3", Operation::Downloaded, Some("local-1".into()))
            .await
            .unwrap();
        store
            .record("b/a.mp3", Operation::Downloaded, Some("local-2".into()))
            .await
            .unwrap();
        assert!(store.has("b/a.mp3", Operation::Downloaded).await);

        let reloaded = ProgressStore::load(&path).await.unwrap();
        assert!(reloaded.has("b/a.mp3", Operation::Downloaded).await);
        assert!(!reloaded.has("b/a.mp3", Operation::Uploaded).await);

        let found = reloaded.find_downloaded_containing("a.mp3").await.unwrap();
        assert_eq!(found.local_identifier.as_deref(), Some("local-1"));
    }

    #[tokio::test]
    async fn find_downloaded_containing_ignores_uploaded_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::load(dir.path().join("processed_files.json"))
            .await
            .unwrap();
        store
            .record("b/x_123456.mp3", Operation::Uploaded, None)
            .await
            .unwrap();
        assert!(store.find_downloaded_containing("123456").await.is_none());
    }
}
