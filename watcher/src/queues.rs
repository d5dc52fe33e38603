//! Work Queues (§3) and the scheduler's armed flags, in strict priority
//! order matching §4.5.

use bitcoin::Txid;
use btcwatch_types::DecodedTransaction;
use std::collections::VecDeque;

#[derive(Default)]
pub struct WorkQueues {
    pub transactions_to_unwatch: VecDeque<Txid>,
    pub new_transactions_to_watch: VecDeque<Txid>,
    pub transactions_to_reanalyze: VecDeque<Txid>,
    pub recheck_mempool_transactions: VecDeque<Txid>,

    /// Raw transaction payloads buffered while an RPC-performing analysis is
    /// in flight (§4.5 "payload-queue discipline"), decoded eagerly since
    /// decoding is pure CPU work with no suspension point.
    pub transaction_payloads_queue: VecDeque<DecodedTransaction>,

    pub check_new_block: bool,
    pub check_mempool_size: bool,
    pub check_raw_mempool: bool,

    /// True while a turn is suspended on an RPC call driven by the
    /// Transaction Analyzer or the Analyzed-Block Window's integration step.
    pub analysis_in_flight: bool,

    /// True until the first post-boot full mempool sweep has completed; only
    /// then does a raw-mempool scan stop feeding `recheck_mempool_transactions`
    /// for every entry (§4.9).
    pub initial_sweep_pending: bool,
}

impl WorkQueues {
    pub fn new() -> Self {
        Self {
            initial_sweep_pending: true,
            ..Default::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.transactions_to_unwatch.is_empty()
            && self.new_transactions_to_watch.is_empty()
            && self.transactions_to_reanalyze.is_empty()
            && !self.check_new_block
            && self.recheck_mempool_transactions.is_empty()
            && !self.check_mempool_size
            && !self.check_raw_mempool
    }

    /// §6 `count_tasks()`: sum of queue lengths and armed flags.
    pub fn count_tasks(&self) -> usize {
        self.transactions_to_unwatch.len()
            + self.new_transactions_to_watch.len()
            + self.transactions_to_reanalyze.len()
            + self.recheck_mempool_transactions.len()
            + usize::from(self.check_new_block)
            + usize::from(self.check_mempool_size)
            + usize::from(self.check_raw_mempool)
    }

    /// Per-queue breakdown backing [`crate::control::WatcherStats`], for
    /// operators who want more than the single `count_tasks()` total.
    pub fn queue_lengths(&self) -> QueueLengths {
        QueueLengths {
            transactions_to_unwatch: self.transactions_to_unwatch.len(),
            new_transactions_to_watch: self.new_transactions_to_watch.len(),
            transactions_to_reanalyze: self.transactions_to_reanalyze.len(),
            recheck_mempool_transactions: self.recheck_mempool_transactions.len(),
            check_new_block_armed: self.check_new_block,
            check_mempool_size_armed: self.check_mempool_size,
            check_raw_mempool_armed: self.check_raw_mempool,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLengths {
    pub transactions_to_unwatch: usize,
    pub new_transactions_to_watch: usize,
    pub transactions_to_reanalyze: usize,
    pub recheck_mempool_transactions: usize,
    pub check_new_block_armed: bool,
    pub check_mempool_size_armed: bool,
    pub check_raw_mempool_armed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_iff_every_queue_and_flag_is_empty() {
        let mut q = WorkQueues::new();
        assert!(q.is_idle());
        q.check_mempool_size = true;
        assert!(!q.is_idle());
        assert_eq!(q.count_tasks(), 1);
    }
}
