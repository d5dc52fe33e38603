//! The control surface of §6 ("collaborators -> engine"): a small
//! request/response protocol over an `mpsc` channel into the scheduler task,
//! mirroring the channel-request pattern `btcwatch-channel` gives the rest of
//! the workspace, adapted to `tokio::sync` since the scheduler lives on the
//! async runtime rather than its own OS thread.

use crate::queues::QueueLengths;
use bitcoin::{Network, Txid};
use tokio::sync::{mpsc, oneshot};

pub const CONTROL_CHANNEL_SIZE: usize = 256;

pub enum ControlMessage {
    WatchNewTransaction(Txid),
    UnwatchTransaction(Txid),
    WatchAddress(String, oneshot::Sender<bool>),
    UnwatchAddress(String),
    CountTasks(oneshot::Sender<usize>),
    GetChain(oneshot::Sender<Option<Network>>),
    GetMempoolWeight(oneshot::Sender<Option<u64>>),
    IsMempoolClear(oneshot::Sender<Option<bool>>),
    GetStats(oneshot::Sender<WatcherStats>),
}

/// Richer diagnostics than `count_tasks()` alone: a per-queue breakdown plus
/// the mempool observer's last sample, for operators who want more than one
/// number (§C "Diagnostics snapshot").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub queues: QueueLengths,
    pub mempool_weight: Option<u64>,
    pub mempool_clear: Option<bool>,
}

/// A cheaply cloneable front door onto a running [`crate::scheduler::Scheduler`].
#[derive(Clone)]
pub struct WatcherHandle {
    control: mpsc::Sender<ControlMessage>,
}

impl WatcherHandle {
    pub(crate) fn new(control: mpsc::Sender<ControlMessage>) -> Self {
        Self { control }
    }

    pub async fn watch_new_transaction(&self, txid: Txid) {
        let _ = self.control.send(ControlMessage::WatchNewTransaction(txid)).await;
    }

    pub async fn unwatch_transaction(&self, txid: Txid) {
        let _ = self.control.send(ControlMessage::UnwatchTransaction(txid)).await;
    }

    /// Idempotent: returns whether the address was already over the
    /// tracking cap at the time of the call.
    pub async fn watch_address(&self, address: impl Into<String>) -> bool {
        let (reply, response) = oneshot::channel();
        if self
            .control
            .send(ControlMessage::WatchAddress(address.into(), reply))
            .await
            .is_err()
        {
            return false;
        }
        response.await.unwrap_or(false)
    }

    pub async fn unwatch_address(&self, address: impl Into<String>) {
        let _ = self.control.send(ControlMessage::UnwatchAddress(address.into())).await;
    }

    pub async fn count_tasks(&self) -> usize {
        self.query(ControlMessage::CountTasks).await.unwrap_or(0)
    }

    /// `None` until the scheduler has completed its startup handshake.
    pub async fn get_chain(&self) -> Option<Network> {
        self.query(ControlMessage::GetChain).await.flatten()
    }

    pub async fn get_mempool_weight(&self) -> Option<u64> {
        self.query(ControlMessage::GetMempoolWeight).await.flatten()
    }

    pub async fn is_mempool_clear(&self) -> Option<bool> {
        self.query(ControlMessage::IsMempoolClear).await.flatten()
    }

    /// Per-queue task counts and the mempool observer's last sample, for
    /// operator diagnostics beyond the single `count_tasks()` total.
    pub async fn stats(&self) -> WatcherStats {
        self.query(ControlMessage::GetStats).await.unwrap_or_default()
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ControlMessage) -> Option<T> {
        let (reply, response) = oneshot::channel();
        if self.control.send(make(reply)).await.is_err() {
            return None;
        }
        response.await.ok()
    }
}
