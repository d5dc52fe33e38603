//! Domain types shared by the RPC client, the transaction decoder and the
//! watcher engine.
//!
//! Node-facing byte identities (`Txid`, `BlockHash`) and address derivation
//! are delegated to the `bitcoin` crate rather than hand-rolled, the way
//! every Bitcoin-facing Rust project does. Everything specific to this
//! watcher — analysis records, input keys, RPC response shapes — is defined
//! here.

mod analysis;
mod decoded;
mod input_key;
mod rpc;

pub use analysis::{TransactionAnalysis, TransactionStatus};
pub use decoded::{AddressKind, DecodedInput, DecodedOutput, DecodedTransaction};
pub use input_key::InputKey;
pub use rpc::{
    BlockVerbose, BlockchainInfo, MempoolEntryInfo, MempoolInfo, NetworkInfo,
    NotificationEndpoints, RawTransactionInfo,
};

pub use bitcoin::{BlockHash, Network, Txid};

/// The maximum number of blocks the analyzed window tracks (N).
pub const ANALYZED_WINDOW_SIZE: usize = 5;

/// Block-weight worth of one block, the mempool "clear" threshold.
pub const MEMPOOL_CLEAR_WEIGHT: u64 = 4_000_000;

/// Cap on concurrently-remembered unconfirmed payments per watched address
/// before it is declared overloaded.
pub const ADDRESS_REPORT_CAP: usize = 1000;

/// Batch size used when re-checking mempool transactions a slice at a time.
pub const MEMPOOL_RECHECK_BATCH: usize = 100;
