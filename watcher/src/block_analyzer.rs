//! Block Analyzer (§4.7): runs inside the "check new block" scheduler slot
//! once the Analyzed-Block Window has integrated a new tip.

use crate::address_reporter;
use crate::queues::WorkQueues;
use crate::state::WatchState;
use crate::tx_analyzer::merge_and_emit;
use crate::window::IntegrationOutcome;
use btcwatch_error::{InvariantError, InvariantErrorKind, RpcError};
use btcwatch_logger::warn;
use btcwatch_notify::{NotifyController, WatcherEvent};
use btcwatch_rpc_client::RpcClient;
use btcwatch_types::{TransactionStatus, ANALYZED_WINDOW_SIZE};
use std::cmp::max;

pub async fn run(
    rpc: &RpcClient,
    state: &mut WatchState,
    notify: &NotifyController,
    queues: &mut WorkQueues,
    outcome: IntegrationOutcome,
) -> Result<(), RpcError> {
    let IntegrationOutcome {
        new_window,
        new_blocks,
        confirmed,
        detached,
        skipped,
    } = outcome;

    // Step 1.
    if skipped {
        notify.notify(WatcherEvent::BlocksSkipped);
        let watched: Vec<_> = state.transaction_analyses.keys().copied().collect();
        queues.transactions_to_reanalyze.extend(watched);
        for watch in state.watched_addresses.values_mut() {
            watch.reported_unconfirmed.clear();
        }
    }

    // Steps 2 and 3: walk every transaction in every freshly attached block.
    for block in &new_blocks {
        let block_confirmations = u32::try_from(block.confirmations.max(0)).unwrap_or(u32::MAX);
        for tx in &block.tx {
            if !state.is_watched(&tx.txid) {
                continue;
            }
            let already_recorded = state
                .transaction_analyses
                .get(&tx.txid)
                .is_some_and(|a| a.block_hashes.contains(&block.hash));

            if !already_recorded {
                let existing = state.transaction_analyses.get(&tx.txid).expect("is_watched");
                let mut updated = existing.clone();
                updated.block_hashes.insert(block.hash);
                updated.confirmations = block_confirmations;
                updated.status = max(
                    TransactionStatus::PartialConfirmation,
                    TransactionStatus::from_confirmations(block_confirmations, ANALYZED_WINDOW_SIZE),
                );
                merge_and_emit(state, notify, queues, tx.txid, updated, true);
            }

            check_conflicts_against_inputs(state, notify, queues, tx);
            address_reporter::report_transaction(rpc, state, notify, tx, block_confirmations).await;
        }
    }

    // Step 4: promote to FullConfirmation anything whose block hashes landed
    // in `confirmed` (newest first).
    for (index, hash) in confirmed.iter().enumerate() {
        let confirmations = (index as u32) + 1 + (ANALYZED_WINDOW_SIZE as u32);
        let affected: Vec<_> = state
            .transaction_analyses
            .iter()
            .filter(|(_, analysis)| analysis.block_hashes.contains(hash))
            .map(|(txid, _)| *txid)
            .collect();
        for txid in affected {
            let existing = state.transaction_analyses.get(&txid).expect("just matched");
            let mut updated = existing.clone();
            updated.status = TransactionStatus::FullConfirmation;
            updated.confirmations = confirmations;
            merge_and_emit(state, notify, queues, txid, updated, true);
        }
    }

    // Step 5: reanalyze anything detached without a replacement attachment.
    for hash in &detached {
        let affected: Vec<_> = state
            .transaction_analyses
            .iter()
            .filter(|(_, analysis)| {
                analysis.block_hashes.contains(hash)
                    && analysis.block_hashes.is_disjoint(&new_window.iter().copied().collect())
            })
            .map(|(txid, _)| *txid)
            .collect();
        queues.transactions_to_reanalyze.extend(affected);
    }

    // Step 6: final address reporting over every confirmed block, batched.
    if !state.watched_addresses.is_empty() && !confirmed.is_empty() {
        let blocks = rpc.get_block_transactions_batch(&confirmed).await;
        for (index, block) in blocks.into_iter().enumerate() {
            let Ok(block) = block else { continue };
            let confirmations = (index as u32) + 1 + (ANALYZED_WINDOW_SIZE as u32);
            for tx in &block.tx {
                address_reporter::report_final_transaction(rpc, state, notify, tx, confirmations).await;
            }
        }
    }

    state.window = new_window.clone();
    if state.window.len() > ANALYZED_WINDOW_SIZE {
        // §7 item 4: logged and skipped, never fatal.
        warn!(
            "{}",
            InvariantError::new(
                InvariantErrorKind::WindowOverflow,
                format!("window held {} hashes after integration", state.window.len())
            )
        );
    }

    // Step 7.
    let best_block_height = new_blocks.last().map(|b| b.height).unwrap_or(0);
    notify.notify(WatcherEvent::NewBlockAnalyzed {
        block_hashes: new_window,
        best_block_height,
        new_blocks: new_blocks.len(),
    });

    Ok(())
}

/// The stream-fast-path conflict check (§4.6), reused here for transactions
/// discovered via a freshly attached block rather than the raw-tx stream,
/// and by the scheduler for the raw-tx stream itself and the mempool
/// recheck batch.
pub(crate) fn check_conflicts_against_inputs(
    state: &mut WatchState,
    notify: &NotifyController,
    queues: &mut WorkQueues,
    tx: &btcwatch_types::DecodedTransaction,
) {
    let keys = tx.input_keys();
    let conflicting: Vec<_> = keys
        .iter()
        .flat_map(|key| state.conflicts_for(key).copied().collect::<Vec<_>>())
        .filter(|candidate| *candidate != tx.txid)
        .collect();
    for other in conflicting {
        if let Some(existing) = state.transaction_analyses.get(&other) {
            let mut updated = existing.clone();
            let mut conflicts = updated.conflicting_transactions.clone().unwrap_or_default();
            conflicts.insert(tx.txid);
            updated.conflicting_transactions = Some(conflicts);
            merge_and_emit(state, notify, queues, other, updated, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{BlockHash, Txid};
    use btcwatch_types::{BlockVerbose, DecodedTransaction, TransactionAnalysis};

    fn hash(byte: u8) -> BlockHash {
        BlockHash::from_byte_array([byte; 32])
    }

    fn txid(byte: u8) -> Txid {
        Txid::from_byte_array([byte; 32])
    }

    fn coinbase(txid_byte: u8) -> DecodedTransaction {
        DecodedTransaction {
            txid: txid(txid_byte),
            is_coinbase: true,
            inputs: vec![],
            outputs: vec![],
        }
    }

    fn test_rpc_client() -> RpcClient {
        RpcClient::new(
            "http://127.0.0.1:1",
            "u",
            "p",
            std::time::Duration::from_secs(1),
            bitcoin::Network::Regtest,
        )
    }

    fn test_notify() -> NotifyController {
        let (_handle, notify) = btcwatch_notify::NotifyService::default().start::<&str>(None);
        notify
    }

    #[tokio::test]
    async fn skipped_flag_reanalyzes_every_watched_txid_and_clears_reported_sets() {
        let mut state = WatchState::new();
        let mut queues = WorkQueues::new();
        let t = txid(1);
        state.set_analysis(t, TransactionAnalysis::unpublished());
        state.watched_addresses.insert(
            "addr".into(),
            crate::state::AddressWatch {
                reported_unconfirmed: [txid(9)].into_iter().collect(),
                overloaded: false,
            },
        );

        let outcome = IntegrationOutcome {
            new_window: vec![hash(1)],
            new_blocks: vec![BlockVerbose {
                hash: hash(1),
                height: 10,
                previous_block_hash: Some(hash(0)),
                confirmations: 1,
                tx: vec![coinbase(2)],
            }],
            confirmed: vec![],
            detached: vec![],
            skipped: true,
        };

        let rpc = test_rpc_client();
        run(&rpc, &mut state, &test_notify(), &mut queues, outcome)
            .await
            .unwrap();

        assert!(queues.transactions_to_reanalyze.contains(&t));
        assert!(state.watched_addresses["addr"].reported_unconfirmed.is_empty());
    }
}
