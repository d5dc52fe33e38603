//! Address Income/Outgo Reporter (§4.8).

use crate::state::WatchState;
use bitcoin::Txid;
use btcwatch_notify::{NotifyController, WatcherEvent};
use btcwatch_rpc_client::RpcClient;
use btcwatch_types::{AddressKind, DecodedTransaction, TransactionStatus, ADDRESS_REPORT_CAP, ANALYZED_WINDOW_SIZE};
use std::collections::HashMap;

/// Run the income and outgo passes for one processed transaction.
/// `confirmations` is the node-reported count for the block this sighting
/// came from, or 0 for a mempool-only sighting.
pub async fn report_transaction(
    rpc: &RpcClient,
    state: &mut WatchState,
    notify: &NotifyController,
    tx: &DecodedTransaction,
    confirmations: u32,
) {
    if state.watched_addresses.is_empty() {
        return;
    }
    let status = TransactionStatus::from_confirmations(confirmations, ANALYZED_WINDOW_SIZE);
    report_incoming(state, notify, tx, status, confirmations);
    report_outgoing(rpc, state, notify, tx, status, confirmations).await;
}

/// Variant used by the block analyzer's "confirmed" pass (§4.7 step 6): the
/// transaction is final, and its (address, txid) pair is dropped from the
/// "already reported" set regardless of whether it was ever reported.
pub async fn report_final_transaction(
    rpc: &RpcClient,
    state: &mut WatchState,
    notify: &NotifyController,
    tx: &DecodedTransaction,
    confirmations: u32,
) {
    report_transaction(rpc, state, notify, tx, confirmations).await;
    for watch in state.watched_addresses.values_mut() {
        watch.reported_unconfirmed.remove(&tx.txid);
    }
}

fn report_incoming(
    state: &mut WatchState,
    notify: &NotifyController,
    tx: &DecodedTransaction,
    status: TransactionStatus,
    confirmations: u32,
) {
    let mut income_by_address: HashMap<String, (u64, bool)> = HashMap::new();
    for output in &tx.outputs {
        let address = match &output.address {
            AddressKind::Address(a) => a.clone(),
            // A bare-multisig script has no single canonical address, so it
            // can never match a watched address and is skipped here. That
            // makes `multi_address` below structurally always false: it is
            // meant to flag an output payable to more than one watched
            // address, but the only kind of output this pass ever attributes
            // income to (`AddressKind::Address`) carries exactly one.
            AddressKind::BareMultisig | AddressKind::None => continue,
        };
        if !state.watched_addresses.contains_key(&address) {
            continue;
        }
        let entry = income_by_address.entry(address).or_insert((0, false));
        entry.0 += output.value_sats;
    }

    for (address, (income, multi_address)) in income_by_address {
        let watch = state
            .watched_addresses
            .get_mut(&address)
            .expect("checked contains_key above");

        if status == TransactionStatus::Mempool {
            if watch.reported_unconfirmed.contains(&tx.txid) {
                continue;
            }
            if watch.reported_unconfirmed.len() >= ADDRESS_REPORT_CAP {
                watch.reported_unconfirmed.clear();
                watch.overloaded = true;
                notify.notify(WatcherEvent::AddressOverload {
                    address: address.clone(),
                });
                continue;
            }
            watch.reported_unconfirmed.insert(tx.txid);
        }

        notify.notify(WatcherEvent::NewAddressPayment {
            address,
            txid: tx.txid,
            status,
            confirmations,
            multi_address,
            income_sats: Some(income),
            outcome_sats: None,
        });
    }
}

async fn report_outgoing(
    rpc: &RpcClient,
    state: &mut WatchState,
    notify: &NotifyController,
    tx: &DecodedTransaction,
    status: TransactionStatus,
    confirmations: u32,
) {
    if tx.is_coinbase || tx.inputs.is_empty() {
        return;
    }
    let prev_txids: Vec<Txid> = tx.inputs.iter().map(|i| i.input_key.previous_txid).collect();
    let prev_results = rpc.get_raw_transactions_batch(&prev_txids).await;

    let mut outcome_by_address: HashMap<String, u64> = HashMap::new();
    for (input, prev) in tx.inputs.iter().zip(prev_results.into_iter()) {
        let Ok(prev) = prev else { continue };
        let Some(output) = prev.decoded.outputs.get(input.input_key.previous_vout as usize) else {
            continue;
        };
        let AddressKind::Address(address) = &output.address else {
            continue;
        };
        if !state.watched_addresses.contains_key(address) {
            continue;
        }
        *outcome_by_address.entry(address.clone()).or_insert(0) += output.value_sats;
    }

    for (address, outcome_sats) in outcome_by_address {
        notify.notify(WatcherEvent::NewAddressPayment {
            address,
            txid: tx.txid,
            status,
            confirmations,
            multi_address: false,
            income_sats: None,
            outcome_sats: Some(outcome_sats),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AddressWatch;
    use bitcoin::hashes::Hash;

    fn txid(byte: u8) -> Txid {
        Txid::from_byte_array([byte; 32])
    }

    fn notify_pair() -> (NotifyController, btcwatch_channel::Receiver<WatcherEvent>) {
        let (_handle, notify) = btcwatch_notify::NotifyService::default().start::<&str>(None);
        let rx = notify.subscribe("test");
        (notify, rx)
    }

    fn tx_paying(address: &str, sats: u64, txid_byte: u8) -> DecodedTransaction {
        DecodedTransaction {
            txid: txid(txid_byte),
            is_coinbase: false,
            inputs: vec![],
            outputs: vec![btcwatch_types::DecodedOutput {
                value_sats: sats,
                script_pubkey: vec![],
                address: AddressKind::Address(address.to_string()),
            }],
        }
    }

    #[test]
    fn reports_incoming_once_per_unconfirmed_sighting() {
        let mut state = WatchState::new();
        state
            .watched_addresses
            .insert("addr1".to_string(), AddressWatch::default());
        let (notify, rx) = notify_pair();
        let tx = tx_paying("addr1", 5_000, 1);

        report_incoming(&mut state, &notify, &tx, TransactionStatus::Mempool, 0);
        report_incoming(&mut state, &notify, &tx, TransactionStatus::Mempool, 0);

        let event = rx.recv().unwrap();
        assert!(matches!(
            event,
            WatcherEvent::NewAddressPayment { income_sats: Some(5_000), .. }
        ));
        assert!(rx.try_recv().is_err(), "second identical sighting must not re-report");
    }

    #[test]
    fn overload_fires_once_cap_is_exceeded() {
        let mut state = WatchState::new();
        state
            .watched_addresses
            .insert("addr1".to_string(), AddressWatch::default());
        let (notify, rx) = notify_pair();

        for i in 0..btcwatch_types::ADDRESS_REPORT_CAP as u16 {
            let tx = tx_paying("addr1", 1, (i % 255) as u8);
            // vary the txid by more than one byte so 1000 stay distinct
            let mut tx = tx;
            tx.txid = {
                let mut bytes = [0u8; 32];
                bytes[0..2].copy_from_slice(&i.to_le_bytes());
                Txid::from_byte_array(bytes)
            };
            report_incoming(&mut state, &notify, &tx, TransactionStatus::Mempool, 0);
        }
        // drain the 1000 payment events
        for _ in 0..btcwatch_types::ADDRESS_REPORT_CAP {
            rx.recv().unwrap();
        }
        assert!(!state.watched_addresses["addr1"].overloaded);

        let mut overload_tx = tx_paying("addr1", 1, 250);
        overload_tx.txid = Txid::from_byte_array([0xff; 32]);
        report_incoming(&mut state, &notify, &overload_tx, TransactionStatus::Mempool, 0);

        assert!(matches!(rx.recv().unwrap(), WatcherEvent::AddressOverload { .. }));
        assert!(
            rx.try_recv().is_err(),
            "the straw transaction must not also emit a payment"
        );
        assert!(state.watched_addresses["addr1"].overloaded);
    }
}
