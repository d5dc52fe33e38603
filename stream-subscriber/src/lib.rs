//! Stream Subscriber (§4.2).
//!
//! Connects to the node's publish/subscribe endpoints and turns framed ZMQ
//! messages into the two signals the scheduler needs: "here is a raw
//! transaction" and "a new block probably exists". Each stream is a
//! long-lived, independently reconnecting task; none of them know anything
//! about watch state, matching the "RPC Client and Stream Subscriber are
//! leaves" framing of §2.

use btcwatch_logger::{debug, info, warn};
use btcwatch_rpc_client::RpcClient;
use btcwatch_types::NotificationEndpoints;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use zeromq::{Socket, SocketRecv, SubSocket, ZmqMessage};

/// A message handed to the scheduler, already stripped of its ZMQ framing.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A full raw transaction payload from the `rawtx` topic: every
    /// transaction accepted into the node's mempool, and every transaction
    /// in every new block.
    RawTx(Vec<u8>),
    /// A hint that the chain tip may have changed: a `rawblock` message
    /// (opaque here), a `sequence` "connected block" message, or a polling
    /// tick. The scheduler is responsible for checking whether the tip
    /// actually moved.
    BlockHint,
}

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("the node did not advertise a rawtx notification endpoint")]
    MissingRawTxEndpoint,
}

/// Which source is supplying block-hint signals, for startup logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHintSource {
    RawBlock,
    Sequence,
    /// Neither stream was advertised; falling back to a 60s poll of
    /// `getbestblockhash` (§4.2).
    Polling,
}

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const ZMQ_TOPIC_RAWTX: &str = "rawtx";
const ZMQ_TOPIC_RAWBLOCK: &str = "rawblock";
const ZMQ_TOPIC_SEQUENCE: &str = "sequence";

/// Offset, within a `sequence` message's body frame, of the one-byte label
/// that follows the 32-byte block/transaction hash. "33rd byte" in §4.2
/// counts from the start of the body frame (the topic is a separate ZMQ
/// frame), so the label sits at index 32.
const SEQUENCE_LABEL_OFFSET: usize = 32;
const SEQUENCE_LABEL_CONNECTED_BLOCK: u8 = b'C';

pub struct SubscriberHandles {
    pub tasks: Vec<JoinHandle<()>>,
    pub block_hint_source: BlockHintSource,
}

/// Connect every advertised topic and return once all tasks are spawned.
/// `node_host` is used to rewrite loopback-advertised endpoints (§4.2); the
/// raw-tx endpoint is mandatory, matching §6 "missing raw-tx endpoint is
/// fatal at startup".
pub fn spawn(
    node_host: &str,
    endpoints: &NotificationEndpoints,
    rpc_for_polling: RpcClient,
    poll_interval: Duration,
    events: mpsc::Sender<StreamEvent>,
    stop: CancellationToken,
) -> Result<SubscriberHandles, SubscriberError> {
    let rawtx_endpoint = endpoints
        .rawtx
        .as_deref()
        .map(|e| rewrite_endpoint(e, node_host))
        .ok_or(SubscriberError::MissingRawTxEndpoint)?;

    let mut tasks = Vec::new();
    tasks.push(tokio::spawn(sub_loop(
        "rawtx",
        rawtx_endpoint,
        ZMQ_TOPIC_RAWTX,
        events.clone(),
        stop.clone(),
        |_frames| Some(StreamEvent::RawTx(_frames.into_iter().nth(1)?.to_vec())),
    )));

    let block_hint_source = if let Some(rawblock) = &endpoints.rawblock {
        let endpoint = rewrite_endpoint(rawblock, node_host);
        tasks.push(tokio::spawn(sub_loop(
            "rawblock",
            endpoint,
            ZMQ_TOPIC_RAWBLOCK,
            events.clone(),
            stop.clone(),
            |_frames| Some(StreamEvent::BlockHint),
        )));
        BlockHintSource::RawBlock
    } else if let Some(sequence) = &endpoints.sequence {
        let endpoint = rewrite_endpoint(sequence, node_host);
        tasks.push(tokio::spawn(sub_loop(
            "sequence",
            endpoint,
            ZMQ_TOPIC_SEQUENCE,
            events.clone(),
            stop.clone(),
            |frames| {
                let body = frames.into_iter().nth(1)?;
                is_connected_block_message(&body).then_some(StreamEvent::BlockHint)
            },
        )));
        BlockHintSource::Sequence
    } else {
        info!("no rawblock or sequence endpoint advertised, falling back to polling");
        tasks.push(tokio::spawn(polling_loop(
            rpc_for_polling,
            poll_interval,
            events,
            stop,
        )));
        BlockHintSource::Polling
    };

    Ok(SubscriberHandles {
        tasks,
        block_hint_source,
    })
}

/// Rewrite an advertised ZMQ endpoint that names the loopback interface when
/// the node itself is reached over a different host (§4.2).
pub fn rewrite_endpoint(advertised: &str, node_host: &str) -> String {
    let Some(without_scheme) = advertised.strip_prefix("tcp://") else {
        return advertised.to_string();
    };
    let Some((host, port)) = without_scheme.rsplit_once(':') else {
        return advertised.to_string();
    };
    let is_loopback = matches!(host, "127.0.0.1" | "localhost" | "0.0.0.0" | "::1");
    if is_loopback && node_host != host {
        format!("tcp://{node_host}:{port}")
    } else {
        advertised.to_string()
    }
}

/// True when a `sequence` message's body frame is a "connected block"
/// notification (label byte `C`); every other label (disconnected block,
/// mempool add/remove) is discarded per §4.2.
fn is_connected_block_message(body: &[u8]) -> bool {
    body.get(SEQUENCE_LABEL_OFFSET) == Some(&SEQUENCE_LABEL_CONNECTED_BLOCK)
}

async fn connect_sub(endpoint: &str, topic: &str) -> Result<SubSocket, zeromq::ZmqError> {
    let mut socket = SubSocket::new();
    socket.connect(endpoint).await?;
    socket.subscribe(topic).await?;
    Ok(socket)
}

async fn sub_loop(
    label: &'static str,
    endpoint: String,
    topic: &'static str,
    events: mpsc::Sender<StreamEvent>,
    stop: CancellationToken,
    extract: impl Fn(Vec<bytes::Bytes>) -> Option<StreamEvent>,
) {
    loop {
        if stop.is_cancelled() {
            return;
        }
        let mut socket = match connect_sub(&endpoint, topic).await {
            Ok(socket) => {
                info!("{label} stream connected to {endpoint}");
                socket
            }
            Err(err) => {
                warn!("{label} stream failed to connect to {endpoint}: {err}");
                if wait_or_stop(&stop).await {
                    return;
                }
                continue;
            }
        };

        loop {
            let received: ZmqMessage = tokio::select! {
                _ = stop.cancelled() => return,
                recvd = socket.recv() => match recvd {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!("{label} stream disconnected: {err}, reconnecting");
                        break;
                    }
                },
            };
            let frames = received.into_vec();
            if let Some(event) = extract(frames) {
                if events.send(event).await.is_err() {
                    debug!("{label} stream: scheduler channel closed, stopping");
                    return;
                }
            }
        }

        if wait_or_stop(&stop).await {
            return;
        }
    }
}

async fn polling_loop(
    rpc: RpcClient,
    interval: Duration,
    events: mpsc::Sender<StreamEvent>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = sleep(interval) => {}
        }
        if rpc.get_best_block_hash().await.is_ok() && events.send(StreamEvent::BlockHint).await.is_err() {
            return;
        }
    }
}

/// Sleep out the reconnect backoff, or return `true` immediately if asked to
/// stop in the meantime.
async fn wait_or_stop(stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => true,
        _ = sleep(RECONNECT_BACKOFF) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_loopback_to_configured_host() {
        assert_eq!(
            rewrite_endpoint("tcp://127.0.0.1:28332", "node.example.com"),
            "tcp://node.example.com:28332"
        );
        assert_eq!(
            rewrite_endpoint("tcp://203.0.113.7:28332", "node.example.com"),
            "tcp://203.0.113.7:28332"
        );
    }

    #[test]
    fn leaves_matching_host_alone() {
        assert_eq!(
            rewrite_endpoint("tcp://127.0.0.1:28332", "127.0.0.1"),
            "tcp://127.0.0.1:28332"
        );
    }

    #[test]
    fn recognizes_connected_block_label() {
        let mut body = vec![0xaa; 32];
        body.push(b'C');
        assert!(is_connected_block_message(&body));

        let mut disconnect = vec![0xaa; 32];
        disconnect.push(b'D');
        assert!(!is_connected_block_message(&disconnect));
    }
}
