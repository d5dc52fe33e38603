//! Analyzed-Block Window (§3, §4.4): the bounded sliding sequence of the
//! last N block hashes treated as not-yet-finalized.
//!
//! `integrate` is a free function taking its RPC client and current window
//! by value, not a `&mut self` method: it has no business mutating
//! `WatchState` itself, and keeping it side-effect-free means the scheduler
//! can run it inside the payload-buffering wrapper (§4.5) without holding a
//! borrow of the rest of the engine across the awaited RPC calls.

use bitcoin::BlockHash;
use btcwatch_error::RpcError;
use btcwatch_rpc_client::RpcClient;
use btcwatch_types::{BlockVerbose, ANALYZED_WINDOW_SIZE};

/// The result of walking back from a new chain tip (§4.4).
#[derive(Debug, Clone)]
pub struct IntegrationOutcome {
    /// The window after this integration, oldest first, length <= N.
    pub new_window: Vec<BlockHash>,
    /// Freshly walked blocks, oldest first, with their full transaction list.
    pub new_blocks: Vec<BlockVerbose>,
    /// Hashes that aged out of the window into finality, newest-first.
    pub confirmed: Vec<BlockHash>,
    /// Old hashes no longer on the best chain.
    pub detached: Vec<BlockHash>,
    /// True when N new blocks were walked and none of them attaches to the
    /// previous (non-empty) window: a reorg deeper than the window itself.
    pub skipped: bool,
}

/// Walk back from `new_tip` along the node's chain, up to N steps, stopping
/// when a parent hash is already in `window` or height 0 is reached.
pub async fn integrate(
    window: Vec<BlockHash>,
    rpc: RpcClient,
    new_tip: BlockHash,
) -> Result<IntegrationOutcome, RpcError> {
    let mut collected_newest_first = Vec::with_capacity(ANALYZED_WINDOW_SIZE);
    let mut cursor = new_tip;
    for _ in 0..ANALYZED_WINDOW_SIZE {
        let block = rpc.get_block_verbose(&cursor).await?;
        let previous = block.previous_block_hash;
        let height = block.height;
        collected_newest_first.push(block);
        match previous {
            Some(parent) if window.contains(&parent) => break,
            Some(parent) if height > 0 => cursor = parent,
            _ => break,
        }
    }

    let mut new_blocks = collected_newest_first;
    new_blocks.reverse(); // oldest first

    let was_empty = window.is_empty();
    let first_previous = new_blocks.first().and_then(|b| b.previous_block_hash);
    let last_attached_index = first_previous.and_then(|parent| window.iter().position(|h| *h == parent));

    let skipped = new_blocks.len() >= ANALYZED_WINDOW_SIZE && last_attached_index.is_none() && !was_empty;

    let detached: Vec<BlockHash> = match last_attached_index {
        Some(idx) => window[idx + 1..].to_vec(),
        None => window.clone(),
    };

    let mut attached: Vec<BlockHash> = match last_attached_index {
        Some(idx) => window[..=idx].to_vec(),
        None => Vec::new(),
    };
    attached.extend(new_blocks.iter().map(|b| b.hash));

    let overflow = attached.len().saturating_sub(ANALYZED_WINDOW_SIZE);
    let confirmed: Vec<BlockHash> = attached.drain(..overflow).rev().collect();

    Ok(IntegrationOutcome {
        new_window: attached,
        new_blocks,
        confirmed,
        detached,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> BlockHash {
        use bitcoin::hashes::Hash;
        BlockHash::from_byte_array([byte; 32])
    }

    #[test]
    fn truncates_attached_to_window_size_and_reports_confirmed() {
        // Simulate the bookkeeping the async walk would have produced: a
        // window already at capacity plus one freshly attached block.
        let window: Vec<BlockHash> = (1..=5).map(hash).collect();
        let mut attached = window.clone();
        attached.push(hash(6));
        let overflow = attached.len().saturating_sub(ANALYZED_WINDOW_SIZE);
        let confirmed: Vec<BlockHash> = attached.drain(..overflow).rev().collect();
        assert_eq!(confirmed, vec![hash(1)]);
        assert_eq!(attached, vec![hash(2), hash(3), hash(4), hash(5), hash(6)]);
    }
}
