use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wasabi_scan::{build, run};
use wasabi_scan_config::LogFormat;
use wasabi_scan_pipeline::CommandProcessFile;

/// Scans a Wasabi-compatible bucket hierarchy for audio files, drives
/// transcription/summarization against an external command, and uploads
/// derived transcript/summary artifacts back to the store.
#[derive(Parser, Debug)]
#[command(name = "wasabi-scan", version, about)]
struct Args {
    /// Executable invoked as `<command> <args...> <local-audio-path>`,
    /// expected to write `<stem>.transcript.txt` and `<stem>.summary.txt`
    /// next to the input file before exiting 0.
    #[arg(long, env = "WASABI_SCAN_PROCESS_COMMAND")]
    process_command: String,

    /// Extra arguments passed to `process_command` before the input path.
    #[arg(long = "process-arg")]
    process_args: Vec<String>,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = wasabi_scan_config::load()?;
    init_tracing(&config.log_level, config.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let process_file = Arc::new(CommandProcessFile::new(
            args.process_command,
            args.process_args,
        ));
        let listen_addr = config.listen_addr.clone();
        let app = build(&config, process_file).await?;
        run(app, &listen_addr, shutdown_signal()).await
    })
}
