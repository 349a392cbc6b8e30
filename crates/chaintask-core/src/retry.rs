//! Timeout + bounded retry policy for provider calls.
//!
//! Every `eth_getLogs` / `eth_blockNumber` call made by the crosscheck engine
//! goes through [`CallPolicy::call`]: each attempt is bounded by `timeout`,
//! transient failures are retried with exponential backoff, and the last
//! error propagates once retries are exhausted.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ChainTaskError;

/// Exponential delay between attempts: `initial * factor^(n-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let scale = self.factor.saturating_pow(retry.saturating_sub(1));
        self.initial.saturating_mul(scale).min(self.max)
    }
}

/// Serializable form of a [`CallPolicy`], as it appears in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPolicyConfig {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retries: u32,
}

impl Default for CallPolicyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            retries: 3,
        }
    }
}

/// Per-attempt timeout plus bounded retry.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    pub backoff: Backoff,
}

impl Default for CallPolicy {
    fn default() -> Self {
        CallPolicyConfig::default().into()
    }
}

impl From<CallPolicyConfig> for CallPolicy {
    fn from(cfg: CallPolicyConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms),
            retries: cfg.retries,
            backoff: Backoff::default(),
        }
    }
}

impl CallPolicy {
    /// Run `op` under this policy.
    ///
    /// Non-retryable errors (see [`ChainTaskError::is_retryable`]) are returned
    /// immediately; transient ones are retried until the policy is exhausted.
    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ChainTaskError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainTaskError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(r) => r,
                Err(_) => Err(ChainTaskError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }),
            };
            match result {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(call = what, attempt, error = %e, "retrying provider call");
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
