//! Watch State (§3): the in-memory maps the scheduler is the sole owner and
//! mutator of (§5 "no turn ever interleaves with another").

use bitcoin::{BlockHash, Txid};
use btcwatch_types::{InputKey, TransactionAnalysis};
use std::collections::{BTreeSet, HashMap};

/// Per-watched-address bookkeeping (§3 "Address Watch").
#[derive(Debug, Clone, Default)]
pub struct AddressWatch {
    /// Txids already reported while unconfirmed, so a later mempool sighting
    /// of the same (address, txid) pair isn't re-reported.
    pub reported_unconfirmed: BTreeSet<Txid>,
    /// Whether this address is currently past the tracking cap.
    pub overloaded: bool,
}

#[derive(Default)]
pub struct WatchState {
    pub transaction_analyses: HashMap<Txid, TransactionAnalysis>,
    pub transactions_by_input: HashMap<InputKey, BTreeSet<Txid>>,
    pub watched_addresses: HashMap<String, AddressWatch>,
    pub window: Vec<BlockHash>,
}

impl WatchState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `analysis` under `txid`, keeping `transactions_by_input` in
    /// lockstep (§3 invariant: every input key maps back to this txid).
    pub fn set_analysis(&mut self, txid: Txid, analysis: TransactionAnalysis) {
        if let Some(previous) = self.transaction_analyses.get(&txid) {
            if let Some(old_keys) = &previous.transaction_input_keys {
                let still_present = analysis.transaction_input_keys.as_ref();
                for key in old_keys {
                    if still_present.map(|keys| !keys.contains(key)).unwrap_or(true) {
                        self.unindex(*key, txid);
                    }
                }
            }
        }
        if let Some(keys) = &analysis.transaction_input_keys {
            for key in keys {
                self.transactions_by_input.entry(*key).or_default().insert(txid);
            }
        }
        self.transaction_analyses.insert(txid, analysis);
    }

    /// Remove a txid from watch state and the conflict index (§4.5 slot 1).
    pub fn remove(&mut self, txid: &Txid) -> Option<TransactionAnalysis> {
        let removed = self.transaction_analyses.remove(txid);
        if let Some(analysis) = &removed {
            if let Some(keys) = &analysis.transaction_input_keys {
                for key in keys {
                    self.unindex(*key, *txid);
                }
            }
        }
        removed
    }

    fn unindex(&mut self, key: InputKey, txid: Txid) {
        if let Some(set) = self.transactions_by_input.get_mut(&key) {
            set.remove(&txid);
            if set.is_empty() {
                self.transactions_by_input.remove(&key);
            }
        }
    }

    pub fn conflicts_for(&self, key: &InputKey) -> impl Iterator<Item = &Txid> {
        self.transactions_by_input.get(key).into_iter().flatten()
    }

    pub fn is_watched(&self, txid: &Txid) -> bool {
        self.transaction_analyses.contains_key(txid)
    }
}
