//! Transaction Analyzer (§4.6).
//!
//! `analyze` is a free function over an owned `RpcClient` and a snapshot of
//! the analyzed window, not a method on the engine: it never touches watch
//! state directly, so the scheduler can run it inside the payload-buffering
//! wrapper without holding any borrow across its awaited RPC calls.

use crate::queues::WorkQueues;
use crate::state::WatchState;
use bitcoin::{BlockHash, Txid};
use btcwatch_error::RpcError;
use btcwatch_notify::{NotifyController, WatcherEvent};
use btcwatch_rpc_client::RpcClient;
use btcwatch_types::{InputKey, TransactionAnalysis, TransactionStatus, ANALYZED_WINDOW_SIZE};
use std::collections::BTreeSet;

/// §4.6 steps 1-6: query the node, then shape the result into a
/// `TransactionAnalysis`.
pub async fn analyze(
    rpc: RpcClient,
    window: Vec<BlockHash>,
    txid: Txid,
    find_conflicts: bool,
) -> Result<TransactionAnalysis, RpcError> {
    let in_mempool = match rpc.is_in_mempool(&txid).await {
        Ok(v) => v,
        Err(e) if e.is_not_found() => false,
        Err(e) => return Err(e),
    };

    let raw = match rpc.get_raw_transaction(&txid).await {
        Ok(raw) => raw,
        Err(e) if e.is_not_found() => {
            let status = if in_mempool {
                TransactionStatus::Mempool
            } else {
                TransactionStatus::Unpublished
            };
            return Ok(TransactionAnalysis {
                status,
                block_hashes: BTreeSet::new(),
                confirmations: 0,
                conflicting_transactions: None,
                transaction_input_keys: None,
                raw_transaction: None,
            });
        }
        Err(e) => return Err(e),
    };

    let input_keys: BTreeSet<InputKey> = raw.decoded.input_keys();
    let confirmations = raw.confirmations;
    let status = TransactionStatus::from_confirmations(confirmations, ANALYZED_WINDOW_SIZE);

    let block_hashes = match (status, raw.blockhash) {
        (TransactionStatus::Mempool, _) => BTreeSet::new(),
        (_, Some(hash)) => BTreeSet::from([hash]),
        (_, None) => BTreeSet::new(),
    };

    let conflicting_transactions = if find_conflicts {
        Some(find_conflicts_against_window(&rpc, &window, txid, &input_keys).await?)
    } else {
        None
    };

    Ok(TransactionAnalysis {
        status,
        block_hashes,
        confirmations,
        conflicting_transactions,
        transaction_input_keys: Some(input_keys),
        raw_transaction: Some(raw.decoded),
    })
}

/// §4.6 step 6: fetch every transaction in every block of the analyzed
/// window and flag any whose inputs share a key with `ours`.
async fn find_conflicts_against_window(
    rpc: &RpcClient,
    window: &[BlockHash],
    ours: Txid,
    input_keys: &BTreeSet<InputKey>,
) -> Result<BTreeSet<Txid>, RpcError> {
    let blocks = rpc.get_block_transactions_batch(window).await;
    let mut conflicts = BTreeSet::new();
    for block in blocks.into_iter().flatten() {
        for tx in block.tx {
            if tx.txid == ours {
                continue;
            }
            if tx.input_keys().iter().any(|k| input_keys.contains(k)) {
                conflicts.insert(tx.txid);
            }
        }
    }
    Ok(conflicts)
}

/// §4.6 "Merging rule": combine a freshly computed analysis with the one
/// already on file. `preserve_block_hashes` is true on reorg/confirmation
/// paths, false for the very first analysis of a txid.
pub fn merge(
    old: Option<&TransactionAnalysis>,
    new: TransactionAnalysis,
    preserve_block_hashes: bool,
) -> TransactionAnalysis {
    let Some(old) = old else {
        return new;
    };

    let mut block_hashes = new.block_hashes.clone();
    if preserve_block_hashes {
        block_hashes.extend(old.block_hashes.iter().copied());
    }

    let conflicting_transactions = match (&old.conflicting_transactions, &new.conflicting_transactions) {
        (Some(o), Some(n)) => Some(o.union(n).copied().collect()),
        (Some(o), None) => Some(o.clone()),
        (None, Some(n)) => Some(n.clone()),
        (None, None) => None,
    };

    TransactionAnalysis {
        status: new.status,
        block_hashes,
        confirmations: new.confirmations,
        conflicting_transactions,
        transaction_input_keys: new.transaction_input_keys,
        raw_transaction: new.raw_transaction,
    }
}

/// Apply the merging rule against whatever is on file for `txid`, emit
/// `NewTransactionAnalysis` when the result observably differs, and enqueue
/// an unwatch when the merged status reaches `FullConfirmation` (§4.6).
pub fn merge_and_emit(
    state: &mut WatchState,
    notify: &NotifyController,
    queues: &mut WorkQueues,
    txid: Txid,
    new: TransactionAnalysis,
    preserve_block_hashes: bool,
) {
    let old = state.transaction_analyses.get(&txid).cloned();
    let merged = merge(old.as_ref(), new, preserve_block_hashes);

    let changed = old.as_ref().map(|o| merged.observably_differs_from(o)).unwrap_or(false);
    if changed {
        if let Some(old_analysis) = old {
            notify.notify(WatcherEvent::NewTransactionAnalysis {
                txid,
                old_analysis,
                new_analysis: merged.clone(),
            });
        }
    }

    if merged.status == TransactionStatus::FullConfirmation {
        queues.transactions_to_unwatch.push_back(txid);
    }
    state.set_analysis(txid, merged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn txid(byte: u8) -> Txid {
        use bitcoin::hashes::Hash;
        Txid::from_byte_array([byte; 32])
    }

    fn bare(status: TransactionStatus) -> TransactionAnalysis {
        TransactionAnalysis {
            status,
            block_hashes: BTreeSet::new(),
            confirmations: 0,
            conflicting_transactions: None,
            transaction_input_keys: None,
            raw_transaction: None,
        }
    }

    #[test]
    fn merge_with_no_prior_analysis_returns_the_new_one_verbatim() {
        let new = bare(TransactionStatus::Mempool);
        let merged = merge(None, new.clone(), true);
        assert_eq!(merged, new);
    }

    #[test]
    fn merge_preserves_block_hashes_only_when_asked() {
        use bitcoin::hashes::Hash;
        let h = bitcoin::BlockHash::from_byte_array([9; 32]);
        let mut old = bare(TransactionStatus::PartialConfirmation);
        old.block_hashes.insert(h);
        let new = bare(TransactionStatus::PartialConfirmation);

        let merged_preserve = merge(Some(&old), new.clone(), true);
        assert!(merged_preserve.block_hashes.contains(&h));

        let merged_fresh = merge(Some(&old), new, false);
        assert!(!merged_fresh.block_hashes.contains(&h));
    }

    #[test]
    fn merge_unions_conflicting_transactions() {
        let mut old = bare(TransactionStatus::Mempool);
        old.conflicting_transactions = Some([txid(1)].into_iter().collect());
        let mut new = bare(TransactionStatus::Mempool);
        new.conflicting_transactions = Some([txid(2)].into_iter().collect());

        let merged = merge(Some(&old), new, true);
        let conflicts = merged.conflicting_transactions.unwrap();
        assert!(conflicts.contains(&txid(1)));
        assert!(conflicts.contains(&txid(2)));
    }

    #[test]
    fn merge_and_emit_unwatches_on_full_confirmation() {
        use crate::queues::WorkQueues;
        use crate::state::WatchState;

        let mut state = WatchState::new();
        let mut queues = WorkQueues::new();
        let (_handle, notify) = btcwatch_notify::NotifyService::default().start::<&str>(None);
        let rx = notify.subscribe("test");
        let t = txid(7);

        state.set_analysis(t, bare(TransactionStatus::PartialConfirmation));
        merge_and_emit(&mut state, &notify, &mut queues, t, bare(TransactionStatus::FullConfirmation), true);

        assert_eq!(queues.transactions_to_unwatch.len(), 1);
        assert!(matches!(
            rx.recv().unwrap(),
            btcwatch_notify::WatcherEvent::NewTransactionAnalysis { .. }
        ));
    }
}
