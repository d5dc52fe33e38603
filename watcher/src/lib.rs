//! The watcher engine (§3-§6): watch state, the task scheduler, the
//! transaction/block analyzers, and the startup sequence that wires them to
//! a real node.

mod address_reporter;
mod block_analyzer;
mod control;
mod mempool;
mod queues;
mod scheduler;
mod state;
mod tx_analyzer;
mod window;

pub use control::{WatcherHandle, WatcherStats};
pub use mempool::MempoolObserver;
pub use queues::{QueueLengths, WorkQueues};
pub use scheduler::Scheduler;
pub use state::{AddressWatch, WatchState};

use bitcoin::Network;
use btcwatch_config::WatcherConfig;
use btcwatch_logger::{info, warn};
use btcwatch_notify::NotifyController;
use btcwatch_rpc_client::RpcClient;
use btcwatch_types::BlockchainInfo;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// §5 "Startup ordering": up to six attempts, 20s apart.
pub const STARTUP_RETRY_ATTEMPTS: usize = 6;
pub const STARTUP_RETRY_INTERVAL: Duration = Duration::from_secs(20);
const STREAM_EVENT_CHANNEL_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("node unreachable after {0} attempts: {1}")]
    NodeUnreachable(usize, btcwatch_error::RpcError),
    #[error("could not fetch notification endpoints: {0}")]
    Endpoints(btcwatch_error::RpcError),
    #[error(transparent)]
    Subscriber(#[from] btcwatch_stream_subscriber::SubscriberError),
}

/// What [`spawn`] hands back: the control-surface handle every collaborator
/// uses, and the background task driving the scheduler loop.
pub struct Watcher {
    pub handle: WatcherHandle,
    pub task: JoinHandle<()>,
}

/// Bring up the engine end to end per §5's startup ordering: fetch
/// blockchain info with retry, obtain notification endpoints, connect the
/// streams, then start the scheduler.
///
/// Seeding `transaction_analyses`/the analyzed-block window from an external
/// store is out of scope here (§1: the persistent document store is an
/// external collaborator) — the engine always starts from an empty watch
/// set, with any re-watching done by the caller through [`WatcherHandle`]
/// after this returns.
pub async fn spawn(config: &WatcherConfig, notify: NotifyController, stop: CancellationToken) -> Result<Watcher, StartupError> {
    let url = config.rpc_url();

    // The network is only known after `getblockchaininfo` succeeds, but
    // `RpcClient` needs one up front for its own transaction decoder.
    // Bitcoin mainnet is a safe placeholder: nothing before the handshake
    // below decodes a transaction, so no address gets misinterpreted under
    // the wrong network.
    let bootstrap = RpcClient::new(
        url.clone(),
        config.rpc_user.clone(),
        config.rpc_password.clone(),
        config.rpc_timeout(),
        Network::Bitcoin,
    );
    let chain_info = fetch_blockchain_info_with_retry(&bootstrap).await?;

    let rpc = RpcClient::new(
        url,
        config.rpc_user.clone(),
        config.rpc_password.clone(),
        config.rpc_timeout(),
        chain_info.chain,
    );
    info!(
        "connected to {:?} node at height {}, tip {}",
        chain_info.chain, chain_info.blocks, chain_info.best_block_hash
    );

    let endpoints = rpc.get_notification_endpoints().await.map_err(StartupError::Endpoints)?;

    let (stream_tx, stream_rx) = mpsc::channel(STREAM_EVENT_CHANNEL_SIZE);
    let subscriber = btcwatch_stream_subscriber::spawn(
        &config.node_host,
        &endpoints,
        rpc.clone(),
        config.poll_interval(),
        stream_tx,
        stop.clone(),
    )?;
    info!("stream subscriber up, block hints via {:?}", subscriber.block_hint_source);

    let (scheduler, handle) = scheduler::Scheduler::new(rpc, notify, chain_info.chain, stream_rx, stop);
    let task = tokio::spawn(scheduler.run());

    Ok(Watcher { handle, task })
}

async fn fetch_blockchain_info_with_retry(rpc: &RpcClient) -> Result<BlockchainInfo, StartupError> {
    let mut last_err = None;
    for attempt in 1..=STARTUP_RETRY_ATTEMPTS {
        match rpc.get_blockchain_info().await {
            Ok(info) => return Ok(info),
            Err(e) => {
                warn!("getblockchaininfo attempt {attempt}/{STARTUP_RETRY_ATTEMPTS} failed: {e:?}");
                last_err = Some(e);
                if attempt < STARTUP_RETRY_ATTEMPTS {
                    tokio::time::sleep(STARTUP_RETRY_INTERVAL).await;
                }
            }
        }
    }
    Err(StartupError::NodeUnreachable(
        STARTUP_RETRY_ATTEMPTS,
        last_err.expect("loop always runs at least once"),
    ))
}
