use crate::DecodedTransaction;
use bitcoin::{BlockHash, Network, Txid};

/// `getrawtransaction <txid> true` response, trimmed to the fields the
/// analyzer needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransactionInfo {
    pub txid: Txid,
    pub decoded: DecodedTransaction,
    /// Present and `> 0` once the transaction has been mined.
    pub confirmations: u32,
    pub blockhash: Option<BlockHash>,
}

/// One entry of `getrawmempool true`, or the result of `getmempoolentry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolEntryInfo {
    pub weight: u64,
    pub time: u64,
}

/// `getmempoolinfo`, trimmed to the cheap lower-bound check of §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolInfo {
    pub bytes: u64,
}

/// `getblockchaininfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockchainInfo {
    pub chain: Network,
    pub blocks: u64,
    pub best_block_hash: BlockHash,
}

/// `getblock <hash> 2`: verbose block with a full, decoded transaction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockVerbose {
    pub hash: BlockHash,
    pub height: u64,
    pub previous_block_hash: Option<BlockHash>,
    pub confirmations: i64,
    pub tx: Vec<DecodedTransaction>,
}

/// `getzmqnotifications`, reduced to the two/three topics this watcher
/// cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationEndpoints {
    pub rawtx: Option<String>,
    pub rawblock: Option<String>,
    pub sequence: Option<String>,
}

/// `getnetworkinfo`, trimmed to what startup logging uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub version: u64,
    pub subversion: String,
}
