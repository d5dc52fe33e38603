//! Mempool Observer (§4.9).
//!
//! Tracks whether the node's mempool is "clear" (too small to plausibly hold
//! a backlog of the addresses being watched) using a cheap size-based lower
//! bound before falling back to a full raw-mempool weight scan.

use btcwatch_error::RpcError;
use btcwatch_notify::{NotifyController, WatcherEvent};
use btcwatch_rpc_client::RpcClient;
use btcwatch_types::MEMPOOL_CLEAR_WEIGHT;

#[derive(Default)]
pub struct MempoolObserver {
    last_weight: Option<u64>,
    last_clear: Option<bool>,
}

impl MempoolObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(&self) -> Option<u64> {
        self.last_weight
    }

    pub fn is_clear(&self) -> Option<bool> {
        self.last_clear
    }

    /// Cheap check using `getmempoolinfo`'s byte count: a transaction's
    /// weight is at most 4x its serialized size, so `bytes * 3` already
    /// exceeding the clear threshold proves the mempool isn't clear without
    /// needing the full per-entry scan.
    pub async fn check_size(
        &mut self,
        rpc: &RpcClient,
        notify: &NotifyController,
    ) -> Result<bool, RpcError> {
        let info = rpc.get_mempool_info().await?;
        if info.bytes.saturating_mul(3) > MEMPOOL_CLEAR_WEIGHT {
            self.set_clear(false, notify);
            return Ok(true);
        }
        Ok(false)
    }

    /// Full scan over every raw mempool entry, used when `check_size` can't
    /// rule the mempool clear on its own.
    pub async fn check_raw_mempool(
        &mut self,
        rpc: &RpcClient,
        notify: &NotifyController,
    ) -> Result<(), RpcError> {
        let entries = rpc.get_raw_mempool().await?;
        let total_weight: u64 = entries.values().map(|e| e.weight).sum();
        self.observe_total_weight(total_weight, notify);
        Ok(())
    }

    /// Record a weight total already computed by the caller from a raw
    /// mempool scan (used by the scheduler, which needs the same scan's
    /// txids for the one-shot post-boot sweep and would otherwise fetch
    /// `getrawmempool` twice).
    pub fn observe_total_weight(&mut self, total_weight: u64, notify: &NotifyController) {
        self.last_weight = Some(total_weight);
        self.set_clear(total_weight <= MEMPOOL_CLEAR_WEIGHT, notify);
    }

    /// Only emit on a defined-and-changed transition: the very first sample
    /// establishes a baseline silently, since there's no prior state for
    /// collaborators to have been told about.
    fn set_clear(&mut self, is_clear: bool, notify: &NotifyController) {
        let changed = self.last_clear.is_some_and(|previous| previous != is_clear);
        self.last_clear = Some(is_clear);
        if changed {
            notify.notify(WatcherEvent::NewMempoolClearStatus { is_clear });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify_pair() -> (NotifyController, btcwatch_channel::Receiver<WatcherEvent>) {
        let (_handle, notify) = btcwatch_notify::NotifyService::default().start::<&str>(None);
        let rx = notify.subscribe("test");
        (notify, rx)
    }

    #[test]
    fn first_sample_establishes_baseline_silently() {
        let (notify, rx) = notify_pair();
        let mut observer = MempoolObserver::new();
        observer.set_clear(true, &notify);
        assert!(rx.try_recv().is_err());
        assert_eq!(observer.is_clear(), Some(true));
    }

    #[test]
    fn only_a_changed_sample_emits() {
        let (notify, rx) = notify_pair();
        let mut observer = MempoolObserver::new();
        observer.set_clear(true, &notify);
        observer.set_clear(true, &notify);
        assert!(rx.try_recv().is_err(), "unchanged sample must not re-emit");

        observer.set_clear(false, &notify);
        assert_eq!(
            rx.recv(),
            Ok(WatcherEvent::NewMempoolClearStatus { is_clear: false })
        );
    }
}
