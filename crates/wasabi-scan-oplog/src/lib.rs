// wasabi-scan-oplog - In-memory live log of in-flight/completed/failed items
//
// Mirrored to disk (`processing_log.json`) on every transition with the
// same atomic-rewrite discipline as the progress store. A path appears in
// at most one of `current`/`completed` at any instant.

pub mod error;

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use wasabi_scan_core::{FileRef, LogEntry, LogStatus};

pub use error::{OpLogError, Result};

const COMPLETED_CAPACITY: usize = 100;

/// Exported view of the log, as returned by `snapshot()` and served at
/// `GET /scan/log`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub current: Vec<LogEntry>,
    pub completed: Vec<LogEntry>,
}

struct State {
    current: Vec<LogEntry>,
    completed: Vec<LogEntry>,
}

pub struct OperationLog {
    path: PathBuf,
    state: Mutex<State>,
}

impl OperationLog {
    /// Loads `path`, starting from an empty log if it doesn't exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| OpLogError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => {
                return Err(OpLogError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let log = Self {
            path,
            state: Mutex::new(State {
                current: snapshot.current,
                completed: snapshot.completed,
            }),
        };
        if !log.path.exists() {
            log.persist(&log.state.lock())?;
        }
        Ok(log)
    }

    /// Inserts (or overwrites, by path) a `current` entry as `processing`.
    pub fn enter(&self, file: &FileRef) -> Result<()> {
        let mut state = self.state.lock();
        let entry = LogEntry::processing(file);
        let path = entry.path.clone();
        state.current.retain(|e| e.path != path);
        state.current.push(entry);
        self.persist(&state)
    }

    /// Transitions the matching `current` entry to `retrying`.
    pub fn retry(&self, file: &FileRef, reason: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock();
        let path = file.path();
        if let Some(entry) = state.current.iter_mut().find(|e| e.path == path) {
            entry.status = LogStatus::Retrying;
            entry.error = Some(reason.into());
            entry.timestamp = Utc::now();
        }
        self.persist(&state)
    }

    /// Removes the matching `current` entry and prepends it to
    /// `completed` as `completed`, truncating to the last 100.
    pub fn finish(&self, file: &FileRef, upload_locations: Vec<String>) -> Result<()> {
        let mut state = self.state.lock();
        let path = file.path();
        state.current.retain(|e| e.path != path);

        let entry = LogEntry {
            bucket: file.bucket.clone(),
            key: file.key.clone(),
            path,
            timestamp: Utc::now(),
            status: LogStatus::Completed,
            error: None,
            upload_locations: Some(upload_locations),
        };
        state.completed.insert(0, entry);
        state.completed.truncate(COMPLETED_CAPACITY);
        self.persist(&state)
    }

    /// Transitions the matching `current` entry to `failed`; it stays in
    /// `current` for operator visibility rather than moving to
    /// `completed`.
    pub fn fail(&self, file: &FileRef, reason: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock();
        let path = file.path();
        if let Some(entry) = state.current.iter_mut().find(|e| e.path == path) {
            entry.status = LogStatus::Failed;
            entry.error = Some(reason.into());
            entry.timestamp = Utc::now();
        }
        self.persist(&state)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            current: state.current.clone(),
            completed: state.completed.clone(),
        }
    }

    /// Whether `path` already has a `current` entry, consulted by the
    /// scanner so it doesn't re-enqueue an in-flight file.
    pub fn contains_current(&self, path: &str) -> bool {
        self.state.lock().current.iter().any(|e| e.path == path)
    }

    /// Empties `current`, used on shutdown drain and by the operator's
    /// explicit clear endpoint.
    pub fn clear_current(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.current.clear();
        self.persist(&state)
    }

    fn persist(&self, state: &State) -> Result<()> {
        let snapshot = Snapshot {
            current: state.current.clone(),
            completed: state.completed.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| OpLogError::Write {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, &bytes)
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
    temp.persist(path).map_err(|e| OpLogError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(key: &str) -> FileRef {
        FileRef::new("bucket", key)
    }

    #[test]
    fn enter_then_finish_moves_path_from_current_to_completed() {
        let dir = tempfile::tempdir().unwrap();
        let log = OperationLog::load(dir.path().join("processing_log.json")).unwrap();

        let f = file("a/b.mp3");
        log.enter(&f).unwrap();
        assert!(log.contains_current(&f.path()));

        log.finish(&f, vec!["bucket/a/transcripts/b_transcript.txt".into()])
            .unwrap();
        assert!(!log.contains_current(&f.path()));

        let snap = log.snapshot();
        assert_eq!(snap.current.len(), 0);
        assert_eq!(snap.completed.len(), 1);
        assert_eq!(snap.completed[0].status, LogStatus::Completed);
    }

    #[test]
    fn fail_leaves_entry_in_current_with_failed_status() {
        let dir = tempfile::tempdir().unwrap();
        let log = OperationLog::load(dir.path().join("processing_log.json")).unwrap();

        let f = file("a/b.mp3");
        log.enter(&f).unwrap();
        log.fail(&f, "fatal: bad format").unwrap();

        let snap = log.snapshot();
        assert_eq!(snap.current.len(), 1);
        assert_eq!(snap.current[0].status, LogStatus::Failed);
        assert_eq!(snap.current[0].error.as_deref(), Some("fatal: bad format"));
    }

    #[test]
    fn completed_ring_buffer_is_bounded_and_most_recent_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = OperationLog::load(dir.path().join("processing_log.json")).unwrap();

        for i in 0..150 {
            let f = file(&format!("a/{i}.mp3"));
            log.enter(&f).unwrap();
            log.finish(&f, vec![]).unwrap();
        }

        let snap = log.snapshot();
        assert_eq!(snap.completed.len(), COMPLETED_CAPACITY);
        assert_eq!(snap.completed[0].path, "bucket/a/149.mp3");
    }

    #[test]
    fn clear_current_empties_in_flight_entries_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processing_log.json");
        let log = OperationLog::load(&path).unwrap();

        log.enter(&file("a/b.mp3")).unwrap();
        log.clear_current().unwrap();
        assert_eq!(log.snapshot().current.len(), 0);

        let reloaded = OperationLog::load(&path).unwrap();
        assert_eq!(reloaded.snapshot().current.len(), 0);
    }
}
