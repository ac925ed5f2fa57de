//! Desktop/batch variant: matches locally-produced derived files back to
//! the remote source key they belong to, by correlation id, and uploads
//! them under the derived summary key.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wasabi_scan_core::{file_stem, summary_key_with_extension, Operation};
use wasabi_scan_progress::ProgressStore;
use wasabi_scan_storage::ObjectStore;

const RECONCILE_EXTENSIONS: &[&str] = &[".pdf", ".txt", ".doc", ".docx"];
const TICK: Duration = Duration::from_secs(10);

fn split_remote_path(path: &str) -> Option<(&str, &str)> {
    path.split_once('/')
}

fn lowercased_extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

/// Runs on its own timer against a local directory, independent of the
/// main scan loop, sharing the same `ProgressStore` handle.
pub struct ReconciliationScanner {
    store: Arc<dyn ObjectStore>,
    progress: Arc<ProgressStore>,
    watch_dir: PathBuf,
    seen: Mutex<HashSet<String>>,
    unmatched_count: AtomicU64,
}

impl ReconciliationScanner {
    pub fn new(store: Arc<dyn ObjectStore>, progress: Arc<ProgressStore>, watch_dir: PathBuf) -> Self {
        Self {
            store,
            progress,
            watch_dir,
            seen: Mutex::new(HashSet::new()),
            unmatched_count: AtomicU64::new(0),
        }
    }

    /// Count of files that could not be matched to a source key,
    /// surfaced to the operator instead of silently dropping them.
    pub fn unmatched_count(&self) -> u64 {
        self.unmatched_count.load(Ordering::Relaxed)
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = interval.tick() => self.scan_once().await,
                _ = cancel.cancelled() => return,
            }
        }
    }

    pub async fn scan_once(&self) {
        let mut entries = match tokio::fs::read_dir(&self.watch_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("reconciliation scan of {:?} failed: {e}", self.watch_dir);
                return;
            }
        };

        let mut candidates = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("reconciliation directory read failed: {e}");
                    break;
                }
            };
            let path = entry.path();
            let Some(ext) = lowercased_extension(&path) else {
                continue;
            };
            if RECONCILE_EXTENSIONS.contains(&format!(".{ext}").as_str()) {
                candidates.push(path);
            }
        }

        for path in candidates {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            {
                let mut seen = self.seen.lock().await;
                if seen.contains(&name) {
                    continue;
                }
                seen.insert(name);
            }
            self.process_one(&path).await;
        }
    }

    async fn process_one(&self, path: &Path) {
        let Some(stem) = file_stem(path) else {
            return;
        };
        // Splitting on `_` and taking the final component is lossy (two
        // unrelated files can share a short suffix), so this is a
        // best-effort match attempted regardless of how many components
        // the stem has; a miss still counts against `unmatched_count`
        // rather than being silently dropped.
        let identifier = match stem.rsplit_once('_') {
            Some((_, last)) => last,
            None => stem,
        };

        let Some(record) = self.progress.find_downloaded_containing(identifier).await else {
            warn!("no downloaded record matched correlation id '{identifier}' for {}", path.display());
            self.unmatched_count.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let Some((bucket, key)) = split_remote_path(&record.path) else {
            warn!("malformed stored path '{}', skipping reconciliation", record.path);
            self.unmatched_count.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let extension = lowercased_extension(path).unwrap_or_else(|| "txt".to_string());
        let remote_key = summary_key_with_extension(key, &extension);

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to read {}: {e}", path.display());
                return;
            }
        };

        if let Err(e) = self.store.upload(bucket, &remote_key, &bytes, None).await {
            warn!("failed to upload reconciled summary {bucket}/{remote_key}: {e}");
            return;
        }

        let uploaded_path = format!("{bucket}/{remote_key}");
        if let Err(e) = self
            .progress
            .record(uploaded_path, Operation::Uploaded, None)
            .await
        {
            warn!("failed to record reconciled upload: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasabi_scan_core::Operation as Op;
    use wasabi_scan_storage::InMemoryObjectStore;

    #[tokio::test]
    async fn matches_a_correlation_id_and_uploads_under_the_summary_key() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(
            ProgressStore::load(dir.path().join("processed_files.json"))
                .await
                .unwrap(),
        );
        progress
            .record("b/a/meeting_2024_07_01_abcdef.mp3", Op::Downloaded, None)
            .await
            .unwrap();

        let store = Arc::new(InMemoryObjectStore::new());
        let watch_dir = dir.path().join("incoming");
        tokio::fs::create_dir_all(&watch_dir).await.unwrap();
        let local_file = watch_dir.join("out_x_y_z_q_abcdef.pdf");
        tokio::fs::write(&local_file, b"summary bytes").await.unwrap();

        let scanner = ReconciliationScanner::new(store.clone(), progress.clone(), watch_dir);
        scanner.scan_once().await;

        assert!(store.contains("b", "a/summaries/meeting_2024_07_01_abcdef_summary.pdf"));
        assert_eq!(scanner.unmatched_count(), 0);
    }

    #[tokio::test]
    async fn an_unmatched_correlation_id_is_logged_and_counted_not_dropped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(
            ProgressStore::load(dir.path().join("processed_files.json"))
                .await
                .unwrap(),
        );
        let store = Arc::new(InMemoryObjectStore::new());
        let watch_dir = dir.path().join("incoming");
        tokio::fs::create_dir_all(&watch_dir).await.unwrap();
        tokio::fs::write(watch_dir.join("short_name.txt"), b"x")
            .await
            .unwrap();

        let scanner = ReconciliationScanner::new(store, progress, watch_dir);
        scanner.scan_once().await;
        assert_eq!(scanner.unmatched_count(), 1);
    }

    #[tokio::test]
    async fn a_short_four_component_stem_still_matches_on_its_correlation_id() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(
            ProgressStore::load(dir.path().join("processed_files.json"))
                .await
                .unwrap(),
        );
        progress
            .record("b1/u/v/file_ID42.mp3", Op::Downloaded, None)
            .await
            .unwrap();

        let store = Arc::new(InMemoryObjectStore::new());
        let watch_dir = dir.path().join("incoming");
        tokio::fs::create_dir_all(&watch_dir).await.unwrap();
        tokio::fs::write(watch_dir.join("x_y_z_ID42.pdf"), b"summary bytes")
            .await
            .unwrap();

        let scanner = ReconciliationScanner::new(store.clone(), progress, watch_dir);
        scanner.scan_once().await;

        assert!(store.contains("b1", "u/v/summaries/file_summary.pdf"));
        assert_eq!(scanner.unmatched_count(), 0);
    }

    #[tokio::test]
    async fn a_second_scan_does_not_reprocess_an_already_seen_filename() {
        let dir = tempfile::tempdir().unwrap();
        let progress = Arc::new(
            ProgressStore::load(dir.path().join("processed_files.json"))
                .await
                .unwrap(),
        );
        progress
            .record("b/a/meeting_2024_07_01_abcdef.mp3", Op::Downloaded, None)
            .await
            .unwrap();
        let store = Arc::new(InMemoryObjectStore::new());
        let watch_dir = dir.path().join("incoming");
        tokio::fs::create_dir_all(&watch_dir).await.unwrap();
        tokio::fs::write(watch_dir.join("out_x_y_z_q_abcdef.pdf"), b"v1")
            .await
            .unwrap();

        let scanner = ReconciliationScanner::new(store.clone(), progress, watch_dir.clone());
        scanner.scan_once().await;
        tokio::fs::write(watch_dir.join("out_x_y_z_q_abcdef.pdf"), b"v2")
            .await
            .unwrap();
        scanner.scan_once().await;

        assert_eq!(
            store
                .get("b", "a/summaries/meeting_2024_07_01_abcdef_summary.pdf")
                .unwrap(),
            b"v1"
        );
    }
}
