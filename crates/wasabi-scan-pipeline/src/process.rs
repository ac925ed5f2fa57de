//! The external transcription/summarization callback, and the adapter
//! that turns a scan batch item into a worker-pool `Process` call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use wasabi_scan_core::{file_stem, summary_key, transcript_key, FileRef, Operation};
use wasabi_scan_progress::ProgressStore;
use wasabi_scan_storage::ObjectStore;
use wasabi_scan_workers::Process;

/// Classification the callback itself can assert, for testability,
/// independent of the worker pool's own string-based `classify`.
#[derive(Debug, Clone)]
pub enum ProcessError {
    Transient(String),
    Fatal(String),
}

impl ProcessError {
    fn into_worker_message(self) -> String {
        match self {
            // Carries a marker `classify` recognizes, so a transient
            // verdict asserted here survives the worker pool's own
            // string classification rather than being second-guessed by it.
            ProcessError::Transient(msg) => format!("connection error (transient): {msg}"),
            ProcessError::Fatal(msg) => msg,
        }
    }
}

/// External transcription/summarization step. Takes a local file path,
/// returns `(transcript_bytes, summary_bytes)`.
#[async_trait]
pub trait ProcessFile: Send + Sync {
    async fn process(&self, local_path: &Path) -> Result<(Vec<u8>, Vec<u8>), ProcessError>;
}

/// Adapts a scan batch item (download → external process → upload →
/// record) into the worker pool's `Process` contract.
pub struct PipelineProcess {
    store: Arc<dyn ObjectStore>,
    progress: Arc<ProgressStore>,
    process_file: Arc<dyn ProcessFile>,
    download_dir: PathBuf,
}

impl PipelineProcess {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        progress: Arc<ProgressStore>,
        process_file: Arc<dyn ProcessFile>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            progress,
            process_file,
            download_dir,
        }
    }

    fn local_path_for(&self, file: &FileRef) -> PathBuf {
        let basename = Path::new(&file.key)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.key.replace('/', "_"));
        self.download_dir.join(format!("{}__{}", file.bucket, basename))
    }
}

#[async_trait]
impl Process for PipelineProcess {
    async fn process(&self, file: &FileRef) -> Result<Vec<String>, String> {
        let local_path = self.local_path_for(file);

        // `downloaded` is recorded early only when we skip the network
        // transfer entirely; otherwise it's recorded alongside the two
        // `uploaded` rows once processing and uploads succeed, so a
        // fatal failure in between leaves no progress record and the
        // file is retried on the next scan (§4.6 step 4, §7.4).
        let already_downloaded = local_path.exists();
        if already_downloaded {
            debug!("reusing existing local file for {}", file.path());
            let identifier = file_stem(&local_path).map(|s| s.to_string());
            self.progress
                .record(file.path(), Operation::Downloaded, identifier)
                .await
                .map_err(|e| e.to_string())?;
        } else {
            self.store
                .download(&file.bucket, &file.key, &local_path)
                .await
                .map_err(|e| e.to_string())?;
        }

        let (transcript, summary) = self
            .process_file
            .process(&local_path)
            .await
            .map_err(ProcessError::into_worker_message)?;

        let transcript_key = transcript_key(&file.key);
        let summary_key = summary_key(&file.key);

        self.store
            .upload(&file.bucket, &transcript_key, &transcript, None)
            .await
            .map_err(|e| e.to_string())?;
        self.store
            .upload(&file.bucket, &summary_key, &summary, None)
            .await
            .map_err(|e| e.to_string())?;

        let transcript_path = format!("{}/{transcript_key}", file.bucket);
        let summary_path = format!("{}/{summary_key}", file.bucket);

        if !already_downloaded {
            self.progress
                .record(file.path(), Operation::Downloaded, None)
                .await
                .map_err(|e| e.to_string())?;
        }
        self.progress
            .record(transcript_path.clone(), Operation::Uploaded, None)
            .await
            .map_err(|e| e.to_string())?;
        self.progress
            .record(summary_path.clone(), Operation::Uploaded, None)
            .await
            .map_err(|e| e.to_string())?;

        Ok(vec![transcript_path, summary_path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasabi_scan_storage::InMemoryObjectStore;

    struct FixedProcessFile;

    #[async_trait]
    impl ProcessFile for FixedProcessFile {
        async fn process(&self, _local_path: &Path) -> Result<(Vec<u8>, Vec<u8>), ProcessError> {
            Ok((b"transcript".to_vec(), b"summary".to_vec()))
        }
    }

    #[tokio::test]
    async fn process_downloads_calls_callback_uploads_derived_keys_and_records_progress() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        store
            .upload("b", "a/file.mp3", b"audio bytes", None)
            .await
            .unwrap();
        let progress = Arc::new(
            ProgressStore::load(dir.path().join("processed_files.json"))
                .await
                .unwrap(),
        );
        let download_dir = dir.path().join("downloads");
        let pipeline = PipelineProcess::new(
            store.clone(),
            progress.clone(),
            Arc::new(FixedProcessFile),
            download_dir,
        );

        let file = FileRef::new("b", "a/file.mp3");
        let locations = pipeline.process(&file).await.unwrap();
        assert_eq!(
            locations,
            vec![
                "b/a/transcripts/file_transcript.txt".to_string(),
                "b/a/summaries/file_summary.txt".to_string(),
            ]
        );

        assert!(progress.has(&file.path(), Operation::Downloaded).await);
        assert!(
            progress
                .has("b/a/transcripts/file_transcript.txt", Operation::Uploaded)
                .await
        );
    }

    struct FailingProcessFile;

    #[async_trait]
    impl ProcessFile for FailingProcessFile {
        async fn process(&self, _local_path: &Path) -> Result<(Vec<u8>, Vec<u8>), ProcessError> {
            Err(ProcessError::Fatal("unsupported codec".to_string()))
        }
    }

    #[tokio::test]
    async fn fatal_process_errors_surface_their_message_unprefixed() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
        store.upload("b", "a/file.mp3", b"x", None).await.unwrap();
        let progress = Arc::new(
            ProgressStore::load(dir.path().join("processed_files.json"))
                .await
                .unwrap(),
        );
        let pipeline = PipelineProcess::new(
            store,
            progress.clone(),
            Arc::new(FailingProcessFile),
            dir.path().join("downloads"),
        );

        let err = pipeline
            .process(&FileRef::new("b", "a/file.mp3"))
            .await
            .unwrap_err();
        assert_eq!(err, "unsupported codec");
        assert!(
            !progress
                .has("b/a/file.mp3", Operation::Downloaded)
                .await
        );
    }
}
