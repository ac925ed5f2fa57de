// wasabi-scan - Parallel object-store scanner and processing pipeline
//
// Wires the scanner, worker pool, progress store, operation log, and the
// external processing callback into a supervised background loop fronted
// by a small local control API.

pub mod http;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wasabi_scan_config::RuntimeConfig;
use wasabi_scan_oplog::OperationLog;
use wasabi_scan_pipeline::{PipelineProcess, ProcessFile, ReconciliationScanner, ScanLoopConfig, Supervisor};
use wasabi_scan_progress::ProgressStore;
use wasabi_scan_scanner::Scanner;
use wasabi_scan_storage::{ObjectStore, S3Credentials, S3ObjectStore};
use wasabi_scan_workers::WorkerPool;

/// Everything the running daemon needs, built once at startup and shared
/// with the HTTP control surface.
pub struct App {
    pub supervisor: Arc<Supervisor>,
    pub oplog: Arc<OperationLog>,
    pub reconciliation: Arc<ReconciliationScanner>,
}

pub async fn build(config: &RuntimeConfig, process_file: Arc<dyn ProcessFile>) -> anyhow::Result<App> {
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(
        S3Credentials {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        },
        config.default_region.clone(),
    ));

    let progress = Arc::new(
        ProgressStore::load(config.processed_files_path())
            .await
            .context("loading progress store")?,
    );
    let oplog = Arc::new(
        OperationLog::load(config.processing_log_path()).context("loading operation log")?,
    );

    let scanner = Arc::new(Scanner::with_max_batch(
        store.clone(),
        progress.clone(),
        oplog.clone(),
        config.max_batch,
    ));
    let worker_pool = Arc::new(WorkerPool::with_limits(
        config.max_workers,
        config.max_retries,
        Duration::from_secs(config.retry_delay_secs),
    ));

    let download_dir: PathBuf = config.state_dir.join("downloads");
    let process = Arc::new(PipelineProcess::new(
        store.clone(),
        progress.clone(),
        process_file,
        download_dir,
    ));

    let supervisor = Arc::new(Supervisor::new(
        scanner,
        worker_pool,
        process,
        oplog.clone(),
        ScanLoopConfig {
            max_batch: config.max_batch,
            idle_sleep_max_secs: config.idle_sleep_max_secs,
            idle_tick_secs: config.idle_tick_secs,
        },
    ));

    let reconciliation = Arc::new(ReconciliationScanner::new(
        store,
        progress,
        config.reconciliation_dir.clone(),
    ));

    Ok(App {
        supervisor,
        oplog,
        reconciliation,
    })
}

/// Runs the daemon until `shutdown` resolves: serves the control API,
/// drives the reconciliation scanner on its own timer, and drains the
/// scan loop before returning.
pub async fn run(
    app: App,
    listen_addr: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let reconciliation_cancel = CancellationToken::new();
    let reconciliation_task = tokio::spawn(
        app.reconciliation
            .clone()
            .run(reconciliation_cancel.clone()),
    );

    app.supervisor.start().await;

    let router = http::router(http::ControlState {
        supervisor: app.supervisor.clone(),
        oplog: app.oplog.clone(),
    });

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding control surface listener on {listen_addr}"))?;
    info!("control surface listening on {listen_addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("control surface server error")?;

    info!("shutting down");
    app.supervisor.stop().await;
    reconciliation_cancel.cancel();
    if let Err(e) = reconciliation_task.await {
        error!("reconciliation scanner task panicked: {e}");
    }
    Ok(())
}
