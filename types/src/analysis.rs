use crate::{DecodedTransaction, InputKey};
use bitcoin::{BlockHash, Txid};
use std::collections::BTreeSet;

/// The lifecycle state of a watched transaction (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum TransactionStatus {
    /// Unknown to the node: neither in a block nor in the mempool.
    Unpublished,
    /// In the mempool, zero confirmations.
    Mempool,
    /// In a block within the analyzed window: `0 < confirmations <= N`.
    PartialConfirmation,
    /// Aged out of the analyzed window: `confirmations > N`.
    FullConfirmation,
}

impl TransactionStatus {
    /// Confirmations-to-status mapping used throughout §4.6-§4.8.
    pub fn from_confirmations(confirmations: u32, window_size: usize) -> Self {
        if confirmations == 0 {
            TransactionStatus::Mempool
        } else if confirmations as usize <= window_size {
            TransactionStatus::PartialConfirmation
        } else {
            TransactionStatus::FullConfirmation
        }
    }
}

/// The per-watched-transaction record (§3).
///
/// Invariants upheld by constructors/mutators in `btcwatch-watcher`, not
/// enforced by the type itself (the merging rule needs to inspect the old
/// and new record together, so it cannot live in a single-value setter):
/// `status = FullConfirmation ⇒ confirmations > N`;
/// `status = Unpublished ⇒ block_hashes = ∅ ∧ confirmations = 0`;
/// every key in `transaction_input_keys` has a matching entry in the
/// conflict index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionAnalysis {
    pub status: TransactionStatus,
    pub block_hashes: BTreeSet<BlockHash>,
    pub confirmations: u32,
    pub conflicting_transactions: Option<BTreeSet<Txid>>,
    pub transaction_input_keys: Option<BTreeSet<InputKey>>,
    pub raw_transaction: Option<DecodedTransaction>,
}

impl TransactionAnalysis {
    pub fn unpublished() -> Self {
        Self {
            status: TransactionStatus::Unpublished,
            block_hashes: BTreeSet::new(),
            confirmations: 0,
            conflicting_transactions: None,
            transaction_input_keys: None,
            raw_transaction: None,
        }
    }

    pub fn mempool(input_keys: BTreeSet<InputKey>, raw: DecodedTransaction) -> Self {
        Self {
            status: TransactionStatus::Mempool,
            block_hashes: BTreeSet::new(),
            confirmations: 0,
            conflicting_transactions: None,
            transaction_input_keys: Some(input_keys),
            raw_transaction: Some(raw),
        }
    }

    /// Whether this record should be evaluated as "observably changed"
    /// relative to `other`, per the `NewTransactionAnalysis` emission rule
    /// of §4.6: status differs, OR has-inputs differs, OR the number of
    /// known conflicts differs.
    pub fn observably_differs_from(&self, other: &TransactionAnalysis) -> bool {
        self.status != other.status
            || self.transaction_input_keys.is_some() != other.transaction_input_keys.is_some()
            || self.conflict_count() != other.conflict_count()
    }

    pub fn conflict_count(&self) -> usize {
        self.conflicting_transactions
            .as_ref()
            .map(|s| s.len())
            .unwrap_or(0)
    }
}
