// wasabi-scan-workers - Bounded-concurrency executor with retry/backoff
//
// A `tokio::sync::Semaphore`-gated task per item in a scan batch. Batches
// are already bounded to at most 200 items, so true parallelism is
// bounded by the permit count rather than the batch size.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use wasabi_scan_core::FileRef;
use wasabi_scan_oplog::OperationLog;

pub const MAX_WORKERS: usize = 50;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

const TRANSIENT_MARKERS: &[&str] = &[
    "server disconnected",
    "timeout",
    "connection error",
    "rate limit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Transient,
    Fatal,
}

/// Classifies an error message by substring match, lower-cased first.
/// This is the single authority the worker pool, the object store, and
/// the processing callback's `Transient` variant all funnel through.
pub fn classify(message: &str) -> Classification {
    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        Classification::Transient
    } else {
        Classification::Fatal
    }
}

/// The unit of work a worker runs per file: download, external process
/// call, upload, implemented by the processing pipeline crate.
#[async_trait]
pub trait Process: Send + Sync {
    async fn process(&self, file: &FileRef) -> std::result::Result<Vec<String>, String>;
}

#[derive(Debug, Clone)]
pub struct WorkOutcome {
    pub file: FileRef,
    pub result: std::result::Result<Vec<String>, String>,
}

pub struct WorkerPool {
    semaphore: Arc<tokio::sync::Semaphore>,
    max_retries: u32,
    retry_delay: Duration,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::with_limits(MAX_WORKERS, MAX_RETRIES, RETRY_DELAY)
    }

    pub fn with_limits(max_workers: usize, max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_workers)),
            max_retries,
            retry_delay,
        }
    }

    /// Runs every item in `batch` through `process`, with up to
    /// `max_retries` transient retries apiece, awaiting all of them
    /// before returning. Submissions not yet spawned when `cancel` fires
    /// are dropped; in-flight attempts run to completion.
    pub async fn run_batch(
        &self,
        batch: Vec<FileRef>,
        process: Arc<dyn Process>,
        log: Arc<OperationLog>,
        cancel: CancellationToken,
    ) -> Vec<WorkOutcome> {
        let mut handles = Vec::with_capacity(batch.len());
        for file in batch {
            if cancel.is_cancelled() {
                break;
            }
            let semaphore = self.semaphore.clone();
            let process = process.clone();
            let log = log.clone();
            let cancel = cancel.clone();
            let max_retries = self.max_retries;
            let retry_delay = self.retry_delay;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("worker pool semaphore closed");
                run_one(file, process.as_ref(), &log, max_retries, retry_delay, &cancel).await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("worker task panicked: {e}"),
            }
        }
        outcomes
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_one(
    file: FileRef,
    process: &dyn Process,
    log: &OperationLog,
    max_retries: u32,
    retry_delay: Duration,
    cancel: &CancellationToken,
) -> WorkOutcome {
    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        let log_result = if attempt == 0 {
            log.enter(&file)
        } else {
            log.retry(&file, last_error.clone().unwrap_or_default())
        };
        if let Err(e) = log_result {
            warn!("operation log write failed for {}: {e}", file.path());
        }

        match process.process(&file).await {
            Ok(locations) => {
                if let Err(e) = log.finish(&file, locations.clone()) {
                    warn!("operation log write failed for {}: {e}", file.path());
                }
                return WorkOutcome {
                    file,
                    result: Ok(locations),
                };
            }
            Err(message) => {
                attempt += 1;
                let retryable = attempt <= max_retries
                    && classify(&message) == Classification::Transient
                    && !cancel.is_cancelled();

                if retryable {
                    last_error = Some(message);
                    tokio::select! {
                        _ = tokio::time::sleep(retry_delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                    if cancel.is_cancelled() {
                        let reason = last_error.unwrap_or_default();
                        if let Err(e) = log.fail(&file, reason.clone()) {
                            warn!("operation log write failed for {}: {e}", file.path());
                        }
                        return WorkOutcome {
                            file,
                            result: Err(reason),
                        };
                    }
                    continue;
                }

                if let Err(e) = log.fail(&file, message.clone()) {
                    warn!("operation log write failed for {}: {e}", file.path());
                }
                return WorkOutcome {
                    file,
                    result: Err(message),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyThenOk {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl Process for FlakyThenOk {
        async fn process(&self, file: &FileRef) -> std::result::Result<Vec<String>, String> {
            if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err("connection error: reset by peer".to_string())
            } else {
                Ok(vec![format!("{}/done", file.path())])
            }
        }
    }

    struct AlwaysFatal;

    #[async_trait]
    impl Process for AlwaysFatal {
        async fn process(&self, _file: &FileRef) -> std::result::Result<Vec<String>, String> {
            Err("unsupported codec".to_string())
        }
    }

    #[test]
    fn classify_matches_known_transient_markers_case_insensitively() {
        assert_eq!(classify("Connection Error: reset"), Classification::Transient);
        assert_eq!(classify("request timeout"), Classification::Transient);
        assert_eq!(classify("RATE LIMIT exceeded"), Classification::Transient);
        assert_eq!(classify("unsupported codec"), Classification::Fatal);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_up_to_the_limit_then_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(OperationLog::load(dir.path().join("processing_log.json")).unwrap());
        let pool = WorkerPool::with_limits(4, 3, Duration::from_millis(1));
        let process: Arc<dyn Process> = Arc::new(FlakyThenOk {
            failures_left: AtomicUsize::new(2),
        });

        let outcomes = pool
            .run_batch(
                vec![FileRef::new("b", "a.mp3")],
                process,
                log.clone(),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(log.snapshot().completed.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_fail_immediately_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(OperationLog::load(dir.path().join("processing_log.json")).unwrap());
        let pool = WorkerPool::with_limits(4, 3, Duration::from_millis(1));

        let outcomes = pool
            .run_batch(
                vec![FileRef::new("b", "a.mp3")],
                Arc::new(AlwaysFatal),
                log.clone(),
                CancellationToken::new(),
            )
            .await;

        assert!(outcomes[0].result.is_err());
        let snap = log.snapshot();
        assert_eq!(snap.current.len(), 1);
        assert_eq!(snap.current[0].status, wasabi_scan_core::LogStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_drops_unsubmitted_work() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(OperationLog::load(dir.path().join("processing_log.json")).unwrap());
        let pool = WorkerPool::with_limits(4, 3, Duration::from_secs(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcomes = pool
            .run_batch(
                vec![FileRef::new("b", "a.mp3"), FileRef::new("b", "b.mp3")],
                Arc::new(AlwaysFatal),
                log,
                cancel,
            )
            .await;

        assert!(outcomes.is_empty());
    }
}
