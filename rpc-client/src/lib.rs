//! JSON-RPC client against the watched full node (§4.1, §6).
//!
//! Wire responses are schema-light (the design notes call this out
//! explicitly): every method below decodes into a tagged Rust struct before
//! anything further inward ever sees it, rather than passing `serde_json::Value`
//! around. Raw-hex payloads are handed to [`btcwatch_tx_decoder::TxDecoder`]
//! so there is exactly one place that turns transaction bytes into
//! `DecodedTransaction`.

mod client;
mod envelope;

pub use client::{RawRpcClient, RpcResult};

use bitcoin::{BlockHash, Network, Txid};
use btcwatch_error::RpcError;
use btcwatch_tx_decoder::TxDecoder;
use btcwatch_types::{
    BlockVerbose, BlockchainInfo, MempoolEntryInfo, MempoolInfo, NetworkInfo,
    NotificationEndpoints, RawTransactionInfo,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// The typed method surface of §4.1, built atop [`RawRpcClient`].
#[derive(Clone)]
pub struct RpcClient {
    raw: RawRpcClient,
    decoder: TxDecoder,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>, timeout: Duration, network: Network) -> Self {
        Self {
            raw: RawRpcClient::new(url, user, password, timeout),
            decoder: TxDecoder::new(network),
        }
    }

    pub async fn get_raw_transaction(&self, txid: &Txid) -> RpcResult<RawTransactionInfo> {
        let json: RawTxJson = self
            .raw
            .call("getrawtransaction", json!([txid.to_string(), true]), true)
            .await?;
        self.decode_raw_tx(json)
    }

    pub async fn get_raw_transactions_batch(&self, txids: &[Txid]) -> Vec<RpcResult<RawTransactionInfo>> {
        let calls = txids
            .iter()
            .map(|txid| ("getrawtransaction", json!([txid.to_string(), true]), true))
            .collect();
        let results: Vec<RpcResult<RawTxJson>> = self.raw.call_batch(calls).await;
        results
            .into_iter()
            .map(|r| r.and_then(|json| self.decode_raw_tx(json)))
            .collect()
    }

    /// `getmempoolentry`: `NotFound` is not an error here, it means "absent".
    pub async fn is_in_mempool(&self, txid: &Txid) -> RpcResult<bool> {
        let result: RpcResult<Value> = self
            .raw
            .call("getmempoolentry", json!([txid.to_string()]), true)
            .await
            .map(Some)
            .or_else(|e| if e.is_not_found() { Ok(None) } else { Err(e) })
            .map(|opt| opt.unwrap_or(Value::Null));
        match result {
            Ok(Value::Null) => Ok(false),
            Ok(_) => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub async fn get_raw_mempool(&self) -> RpcResult<HashMap<Txid, MempoolEntryInfo>> {
        let json: HashMap<String, MempoolEntryJson> = self
            .raw
            .call("getrawmempool", json!([true]), false)
            .await?;
        json.into_iter()
            .map(|(txid, entry)| {
                let txid = Txid::from_str(&txid).map_err(|e| RpcError::Protocol(e.to_string()))?;
                Ok((
                    txid,
                    MempoolEntryInfo {
                        weight: entry.weight,
                        time: entry.time,
                    },
                ))
            })
            .collect()
    }

    pub async fn get_mempool_info(&self) -> RpcResult<MempoolInfo> {
        let json: MempoolInfoJson = self.raw.call("getmempoolinfo", json!([]), false).await?;
        Ok(MempoolInfo { bytes: json.bytes })
    }

    pub async fn get_blockchain_info(&self) -> RpcResult<BlockchainInfo> {
        let json: BlockchainInfoJson = self
            .raw
            .call("getblockchaininfo", json!([]), false)
            .await?;
        let chain = parse_chain(&json.chain)?;
        let best_block_hash =
            BlockHash::from_str(&json.bestblockhash).map_err(|e| RpcError::Protocol(e.to_string()))?;
        Ok(BlockchainInfo {
            chain,
            blocks: json.blocks,
            best_block_hash,
        })
    }

    pub async fn get_best_block_hash(&self) -> RpcResult<BlockHash> {
        let hash: String = self.raw.call("getbestblockhash", json!([]), false).await?;
        BlockHash::from_str(&hash).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    pub async fn get_block_verbose(&self, hash: &BlockHash) -> RpcResult<BlockVerbose> {
        let json: BlockJson = self
            .raw
            .call("getblock", json!([hash.to_string(), 2]), true)
            .await?;
        self.decode_block(json)
    }

    pub async fn get_block_transactions_batch(&self, hashes: &[BlockHash]) -> Vec<RpcResult<BlockVerbose>> {
        let calls = hashes
            .iter()
            .map(|hash| ("getblock", json!([hash.to_string(), 2]), true))
            .collect();
        let results: Vec<RpcResult<BlockJson>> = self.raw.call_batch(calls).await;
        results
            .into_iter()
            .map(|r| r.and_then(|json| self.decode_block(json)))
            .collect()
    }

    pub async fn get_notification_endpoints(&self) -> RpcResult<NotificationEndpoints> {
        let entries: Vec<ZmqEntryJson> = self
            .raw
            .call("getzmqnotifications", json!([]), false)
            .await?;
        let mut endpoints = NotificationEndpoints::default();
        for entry in entries {
            match entry.kind.as_str() {
                "pubrawtx" => endpoints.rawtx = Some(entry.address),
                "pubrawblock" => endpoints.rawblock = Some(entry.address),
                "pubsequence" => endpoints.sequence = Some(entry.address),
                _ => {}
            }
        }
        Ok(endpoints)
    }

    pub async fn get_network_info(&self) -> RpcResult<NetworkInfo> {
        let json: NetworkInfoJson = self.raw.call("getnetworkinfo", json!([]), false).await?;
        Ok(NetworkInfo {
            version: json.version,
            subversion: json.subversion,
        })
    }

    fn decode_raw_tx(&self, json: RawTxJson) -> RpcResult<RawTransactionInfo> {
        let bytes = hex::decode(&json.hex).map_err(|e| RpcError::Protocol(e.to_string()))?;
        let decoded = self
            .decoder
            .decode(&bytes)
            .map_err(|e| RpcError::Protocol(e.to_string()))?;
        let blockhash = json
            .blockhash
            .map(|h| BlockHash::from_str(&h))
            .transpose()
            .map_err(|e| RpcError::Protocol(e.to_string()))?;
        Ok(RawTransactionInfo {
            txid: decoded.txid,
            decoded,
            confirmations: json.confirmations.unwrap_or(0),
            blockhash,
        })
    }

    fn decode_block(&self, json: BlockJson) -> RpcResult<BlockVerbose> {
        let hash = BlockHash::from_str(&json.hash).map_err(|e| RpcError::Protocol(e.to_string()))?;
        let previous_block_hash = json
            .previousblockhash
            .map(|h| BlockHash::from_str(&h))
            .transpose()
            .map_err(|e| RpcError::Protocol(e.to_string()))?;
        let mut tx = Vec::with_capacity(json.tx.len());
        for entry in json.tx {
            let bytes = hex::decode(&entry.hex).map_err(|e| RpcError::Protocol(e.to_string()))?;
            let decoded = self
                .decoder
                .decode(&bytes)
                .map_err(|e| RpcError::Protocol(e.to_string()))?;
            tx.push(decoded);
        }
        Ok(BlockVerbose {
            hash,
            height: json.height,
            previous_block_hash,
            confirmations: json.confirmations,
            tx,
        })
    }
}

fn parse_chain(chain: &str) -> RpcResult<Network> {
    match chain {
        "main" => Ok(Network::Bitcoin),
        "test" => Ok(Network::Testnet),
        "regtest" => Ok(Network::Regtest),
        "signet" => Ok(Network::Signet),
        other => Err(RpcError::Protocol(format!("unknown chain name {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct RawTxJson {
    hex: String,
    confirmations: Option<u32>,
    blockhash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MempoolEntryJson {
    weight: u64,
    time: u64,
}

#[derive(Debug, Deserialize)]
struct MempoolInfoJson {
    bytes: u64,
}

#[derive(Debug, Deserialize)]
struct BlockchainInfoJson {
    chain: String,
    blocks: u64,
    bestblockhash: String,
}

#[derive(Debug, Deserialize)]
struct BlockTxJson {
    hex: String,
}

#[derive(Debug, Deserialize)]
struct BlockJson {
    hash: String,
    height: u64,
    previousblockhash: Option<String>,
    confirmations: i64,
    tx: Vec<BlockTxJson>,
}

#[derive(Debug, Deserialize)]
struct ZmqEntryJson {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct NetworkInfoJson {
    version: u64,
    subversion: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_chain_names() {
        assert_eq!(parse_chain("main").unwrap(), Network::Bitcoin);
        assert_eq!(parse_chain("regtest").unwrap(), Network::Regtest);
        assert!(parse_chain("nonsense").is_err());
    }
}
