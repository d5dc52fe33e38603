//! The `btcwatch` executable: parse the CLI, load configuration, bring the
//! engine up, and run until asked to stop (§5, §6).

use btcwatch_async_runtime::new_global_runtime;
use btcwatch_config::WatcherConfig;
use btcwatch_logger::{error, info};
use btcwatch_notify::NotifyService;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "btcwatch", version, about = "Bitcoin chain and mempool watcher")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "btcwatch.toml")]
    config: PathBuf,

    /// Default log filter, overridden by `RUST_LOG`.
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    btcwatch_logger::init_with_default(&cli.log);

    let config = match WatcherConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let stop = btcwatch_stop_handler::init();

    let handle = match new_global_runtime() {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match handle.runtime.block_on(run(config, stop)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// `anyhow` at this one boundary: every error below here is typed
/// (`StartupError`, `RpcError`, ...), but nothing above `main` does anything
/// with a failure besides logging it, so collapsing to one dynamic error
/// type here is simpler than propagating the union of every collaborator's
/// error enum through the executable.
async fn run(config: WatcherConfig, stop: CancellationToken) -> anyhow::Result<()> {
    let (notify_thread, notify) = NotifyService::default().start(Some("notify"));
    let engine_notify = notify.clone();

    let watcher = btcwatch_watcher::spawn(&config, engine_notify, stop.clone()).await?;
    info!("btcwatch up, watching {}", config.rpc_url());

    stop.cancelled().await;
    info!("shutting down");
    let _ = watcher.task.await;

    notify.stop();
    let _ = notify_thread.join();
    Ok(())
}
