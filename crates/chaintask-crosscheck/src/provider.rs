//! The chain provider seam.
//!
//! Implement [`ChainProvider`] over whatever JSON-RPC client you already use.
//! The engine only needs the head block number and `eth_getLogs`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chaintask_core::error::ChainTaskError;
use chaintask_core::types::{RawLog, Window};

/// One `eth_getLogs` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    pub addresses: Vec<String>,
    pub topics: Vec<String>,
    #[serde(rename = "fromBlock")]
    pub from_block: u64,
    #[serde(rename = "toBlock")]
    pub to_block: u64,
}

impl LogQuery {
    pub fn new(addresses: Vec<String>, topics: Vec<String>, window: Window) -> Self {
        Self {
            addresses,
            topics,
            from_block: window.from_block,
            to_block: window.to_block,
        }
    }
}

/// Minimal block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
}

/// Trait for reading chain state from a JSON-RPC provider.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<u64, ChainTaskError>;

    /// The latest block. Defaults to wrapping [`block_number`](Self::block_number).
    async fn latest_block(&self) -> Result<BlockRef, ChainTaskError> {
        Ok(BlockRef {
            number: self.block_number().await?,
        })
    }

    /// `eth_getLogs` for one address group.
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, ChainTaskError>;

    /// Batched `eth_getLogs`, if the transport supports JSON-RPC batches.
    fn batch_logs(&self) -> Option<&dyn BatchLogs> {
        None
    }
}

/// Sends several `eth_getLogs` requests in a single round trip.
#[async_trait]
pub trait BatchLogs: Send + Sync {
    /// Results are returned in request order.
    async fn get_logs_batch(&self, queries: &[LogQuery])
        -> Result<Vec<Vec<RawLog>>, ChainTaskError>;
}
