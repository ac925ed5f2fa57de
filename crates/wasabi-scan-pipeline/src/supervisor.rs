//! Orchestrates the scan → dispatch → upload cycle and owns the
//! cancellation token / join handle for the background scan loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wasabi_scan_oplog::OperationLog;
use wasabi_scan_scanner::Scanner;
use wasabi_scan_workers::{Process, WorkerPool};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ScanLoopConfig {
    pub max_batch: usize,
    pub idle_sleep_max_secs: u64,
    pub idle_tick_secs: u64,
}

struct RunState {
    running: bool,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Drives the scan loop on a background task. `start`/`stop` are
/// idempotent and safe to call from the control surface.
pub struct Supervisor {
    scanner: Arc<Scanner>,
    worker_pool: Arc<WorkerPool>,
    process: Arc<dyn Process>,
    oplog: Arc<OperationLog>,
    loop_config: ScanLoopConfig,
    state: Mutex<RunState>,
}

impl Supervisor {
    pub fn new(
        scanner: Arc<Scanner>,
        worker_pool: Arc<WorkerPool>,
        process: Arc<dyn Process>,
        oplog: Arc<OperationLog>,
        loop_config: ScanLoopConfig,
    ) -> Self {
        Self {
            scanner,
            worker_pool,
            process,
            oplog,
            loop_config,
            state: Mutex::new(RunState {
                running: false,
                cancel: CancellationToken::new(),
                handle: None,
            }),
        }
    }

    /// Starts the scan loop. Returns `false` if it was already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().await;
        if state.running {
            return false;
        }

        let cancel = CancellationToken::new();
        let supervisor = self.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move { supervisor.run_loop(loop_cancel).await });

        state.running = true;
        state.cancel = cancel;
        state.handle = Some(handle);
        true
    }

    /// Signals cancellation, waits up to 5s for the loop to drain, then
    /// clears in-flight entries. Always returns `true`.
    pub async fn stop(&self) -> bool {
        let (cancel, handle) = {
            let mut state = self.state.lock().await;
            state.running = false;
            (state.cancel.clone(), state.handle.take())
        };
        cancel.cancel();

        if let Some(handle) = handle {
            if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                error!("scan loop did not drain within {DRAIN_TIMEOUT:?}");
            }
        }

        if let Err(e) = self.oplog.clear_current() {
            error!("failed to clear operation log on stop: {e}");
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!("scan loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let batch = match self.scanner.next_batch(None).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!("scan failed: {e}");
                    idle_sleep(
                        self.loop_config.idle_sleep_max_secs,
                        self.loop_config.idle_tick_secs,
                        &cancel,
                    )
                    .await;
                    continue;
                }
            };

            if batch.is_empty() {
                idle_sleep(
                    self.loop_config.idle_sleep_max_secs,
                    self.loop_config.idle_tick_secs,
                    &cancel,
                )
                .await;
                continue;
            }

            let full_batch = batch.len() >= self.loop_config.max_batch;
            self.worker_pool
                .run_batch(batch, self.process.clone(), self.oplog.clone(), cancel.clone())
                .await;

            if !full_batch {
                idle_sleep(
                    self.loop_config.idle_sleep_max_secs,
                    self.loop_config.idle_tick_secs,
                    &cancel,
                )
                .await;
            }
        }
        info!("scan loop stopped");
    }
}

/// Sleeps up to `max_secs`, in `tick_secs`-granularity steps, returning
/// early the moment `cancel` fires.
async fn idle_sleep(max_secs: u64, tick_secs: u64, cancel: &CancellationToken) {
    let tick_secs = tick_secs.max(1);
    let mut remaining = max_secs;
    while remaining > 0 {
        if cancel.is_cancelled() {
            return;
        }
        let step = tick_secs.min(remaining);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(step)) => {}
            _ = cancel.cancelled() => return,
        }
        remaining = remaining.saturating_sub(step);
    }
}
