//! Crosscheck configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use chaintask_core::retry::{CallPolicy, CallPolicyConfig};
use chaintask_core::types::{LogFilter, LogIdentity};

/// Ethereum mainnet block time.
pub const ETH_BLOCK_INTERVAL_MS: u64 = 12_000;
/// Roughly one hour of Ethereum blocks.
pub const ETH_BLOCK_COUNT_ONE_HOUR: u64 = 300;
pub const DEFAULT_BATCH_BLOCKS_COUNT: u64 = 10;
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_DELAY_BLOCK_FROM_LATEST: u64 = 1;

/// Configuration for one crosscheck engine (one event subscription).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrosscheckConfig {
    /// Contract address(es) and topic(s) to re-scan.
    pub filter: LogFilter,
    /// Explicit start block. Wins over any persisted checkpoint.
    pub from_block: Option<u64>,
    /// Fixed end block. `None` = continuous mode (run until stopped).
    pub to_block: Option<u64>,
    /// Blocks per scan window (default 10).
    pub batch_blocks_count: Option<u64>,
    /// Minimum spacing between ticks in milliseconds (default 3000).
    pub polling_interval_ms: Option<u64>,
    /// Chain block time in milliseconds, used to check the scan cadence.
    pub block_interval_ms: u64,
    /// In continuous mode, a window is only scanned once
    /// `window.to_block + delay_block_from_latest <= head`.
    pub delay_block_from_latest: u64,
    /// Max addresses per `eth_getLogs` call. `None` = all in one call.
    pub address_group_limit: Option<usize>,
    /// Timeout and retry for provider calls (default 15 s, 3 retries).
    pub call_policy: Option<CallPolicyConfig>,
    /// Prefix for every cache key written to the store.
    pub store_key_prefix: String,
    /// TTL of cached log identities, in milliseconds. `None` = never expire.
    ///
    /// This is the dedup horizon: a log whose cache entry expired before a
    /// crosscheck window reaches it again is replayed. Keep it longer than
    /// the largest lag the engine may run behind the chain.
    pub store_ttl_ms: Option<u64>,
    /// Logs never to replay, on top of whatever the cache already holds.
    pub ignore_logs: Vec<LogIdentity>,
}

impl Default for CrosscheckConfig {
    fn default() -> Self {
        Self {
            filter: LogFilter::default(),
            from_block: None,
            to_block: None,
            batch_blocks_count: None,
            polling_interval_ms: None,
            block_interval_ms: ETH_BLOCK_INTERVAL_MS,
            delay_block_from_latest: DEFAULT_DELAY_BLOCK_FROM_LATEST,
            address_group_limit: None,
            call_policy: None,
            store_key_prefix: String::new(),
            store_ttl_ms: None,
            ignore_logs: Vec::new(),
        }
    }
}

impl CrosscheckConfig {
    pub fn batch_blocks(&self) -> u64 {
        self.batch_blocks_count.unwrap_or(DEFAULT_BATCH_BLOCKS_COUNT)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms.unwrap_or(DEFAULT_POLLING_INTERVAL_MS))
    }

    pub fn store_ttl(&self) -> Option<Duration> {
        self.store_ttl_ms.map(Duration::from_millis)
    }

    pub fn call_policy(&self) -> CallPolicy {
        self.call_policy.unwrap_or_default().into()
    }

    /// `true` when a fixed `to_block` bounds the run.
    pub fn is_bounded(&self) -> bool {
        self.to_block.is_some()
    }
}
