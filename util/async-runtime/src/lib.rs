//! Tokio runtime construction, split into its own crate so the choice of
//! runtime flavor is made in exactly one place.

use btcwatch_logger::info;
use tokio::runtime::{Builder, Runtime};

/// A handle to the process-wide multi-threaded runtime plus the join guard
/// that keeps it alive for the duration of `main`.
pub struct Handle {
    pub runtime: Runtime,
}

/// Build the single multi-threaded tokio runtime the whole process shares.
/// RPC calls, the two stream subscriptions, and the scheduler's timers all
/// run as tasks on this runtime; only the scheduler ever mutates watch
/// state, so sharing threads across these tasks is safe.
pub fn new_global_runtime() -> std::io::Result<Handle> {
    let runtime = Builder::new_multi_thread()
        .thread_name("btcwatch")
        .enable_all()
        .build()?;
    info!("tokio runtime started with {} worker threads", num_cpus());
    Ok(Handle { runtime })
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
