pub mod fake_node;

use bitcoin::hashes::Hash;
use bitcoin::{absolute::LockTime, transaction::Version, Amount, BlockHash, Network, OutPoint, ScriptBuf, Transaction, TxIn, TxOut, Txid};
use btcwatch_notify::{NotifyController, NotifyService, WatcherEvent};
use btcwatch_rpc_client::RpcClient;
use btcwatch_stream_subscriber::StreamEvent;
use btcwatch_watcher::{Scheduler, WatcherHandle};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn block_hash(byte: u8) -> BlockHash {
    BlockHash::from_byte_array([byte; 32])
}

pub fn txid(byte: u8) -> Txid {
    Txid::from_byte_array([byte; 32])
}

/// The `getblock 2` shape the Analyzed-Block Window and Block Analyzer
/// consume, with an empty transaction list: enough to drive window
/// attach/detach/confirm bookkeeping without touching a watched address or
/// transaction's content.
pub fn block_json(hash: BlockHash, height: u64, parent: Option<BlockHash>, confirmations: i64) -> Value {
    json!({
        "hash": hash.to_string(),
        "height": height,
        "previousblockhash": parent.map(|p| p.to_string()),
        "confirmations": confirmations,
        "tx": [],
    })
}

pub fn mempool_entry(weight: u64, time: u64) -> Value {
    json!({"weight": weight, "time": time})
}

/// Block on a crossbeam `recv()` via the blocking thread pool instead of
/// calling it directly, so a `current_thread` test runtime (required by
/// `tokio::time::pause`) keeps driving the scheduler task while this test
/// waits for its next event.
pub async fn recv_event(rx: btcwatch_channel::Receiver<WatcherEvent>) -> (WatcherEvent, btcwatch_channel::Receiver<WatcherEvent>) {
    tokio::task::spawn_blocking(move || {
        let event = rx.recv().expect("notify bus closed before expected event");
        (event, rx)
    })
    .await
    .expect("recv_event task panicked")
}

/// A minimal consensus-decodable transaction with a single unspendable
/// output, so `TxDecoder` succeeds but nothing accidentally matches a
/// watched address. `seed` varies the previous-output index so distinct
/// calls produce distinct txids.
pub fn sample_raw_tx_hex(seed: u32) -> (Txid, String) {
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::all_zeros(), seed),
            ..Default::default()
        }],
        output: vec![TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: ScriptBuf::new_op_return(b"fake"),
        }],
    };
    let bytes = bitcoin::consensus::serialize(&tx);
    (tx.compute_txid(), hex::encode(bytes))
}

/// A running `Scheduler` driven purely through its public surface: the
/// stream-event sender, the control handle, and a subscription to its
/// notify bus.
pub struct Harness {
    pub handle: WatcherHandle,
    pub events: btcwatch_channel::Receiver<WatcherEvent>,
    pub stream_tx: mpsc::Sender<StreamEvent>,
    pub notify: NotifyController,
    stop: CancellationToken,
}

impl Harness {
    pub async fn shutdown(self) {
        self.stop.cancel();
    }
}

pub fn start_scheduler(rpc_url: String) -> Harness {
    let rpc = RpcClient::new(rpc_url, "", "", Duration::from_secs(5), Network::Regtest);
    let (_notify_join, notify) = NotifyService::default().start::<&str>(None);
    let events = notify.subscribe("integration-test");
    let (stream_tx, stream_rx) = mpsc::channel(32);
    let stop = CancellationToken::new();

    let (scheduler, handle) = Scheduler::new(rpc, notify.clone(), Network::Regtest, stream_rx, stop.clone());
    tokio::spawn(scheduler.run());

    Harness {
        handle,
        events,
        stream_tx,
        notify,
        stop,
    }
}
