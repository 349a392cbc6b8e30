//! Shared log and block-range types.

use std::fmt;

use serde::{Deserialize, Serialize};

// ─── RawLog ──────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    /// The concrete `(transactionHash, index)` identity of this log.
    pub fn identity(&self) -> LogIdentity {
        LogIdentity::new(self.tx_hash.clone(), self.log_index_u32())
    }

    /// Sort key giving ascending chain order.
    pub fn position(&self) -> (u64, u32) {
        (self.block_number_u64(), self.log_index_u32())
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

// ─── LogIdentity ─────────────────────────────────────────────────────────────

/// Identifies a log by transaction hash and, optionally, its index.
///
/// An identity without an index is coarse: it stands for every log emitted
/// by the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogIdentity {
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl LogIdentity {
    pub fn new(tx_hash: impl Into<String>, index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index: Some(index),
        }
    }

    /// A coarse identity covering the whole transaction.
    pub fn tx(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index: None,
        }
    }

    /// Matching rule used for ignore lists: same transaction, and either side
    /// has no index or both indices are equal.
    pub fn matches(&self, other: &LogIdentity) -> bool {
        self.tx_hash == other.tx_hash
            && match (self.index, other.index) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }
}

impl fmt::Display for LogIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "{}:{}", self.tx_hash, i),
            None => write!(f, "{}", self.tx_hash),
        }
    }
}

impl From<&RawLog> for LogIdentity {
    fn from(log: &RawLog) -> Self {
        log.identity()
    }
}

// ─── LogFilter ───────────────────────────────────────────────────────────────

/// Address + topic filter for `eth_getLogs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
    /// Positional topics; usually just the event signature hash.
    pub topics: Vec<String>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a positional topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Split the address list into groups of at most `limit` addresses.
    ///
    /// No limit (or an empty address list) yields a single group.
    pub fn address_groups(&self, limit: Option<usize>) -> Vec<Vec<String>> {
        match limit {
            Some(n) if n > 0 && !self.addresses.is_empty() => {
                self.addresses.chunks(n).map(|c| c.to_vec()).collect()
            }
            _ => vec![self.addresses.clone()],
        }
    }
}

// ─── Window ──────────────────────────────────────────────────────────────────

/// A contiguous inclusive block range scanned in one crosscheck pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub from_block: u64,
    pub to_block: u64,
}

impl Window {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self { from_block, to_block }
    }

    /// Number of blocks covered.
    pub fn len(&self) -> u64 {
        self.to_block.saturating_sub(self.from_block).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.to_block < self.from_block
    }

    pub fn contains(&self, block: u64) -> bool {
        (self.from_block..=self.to_block).contains(&block)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
