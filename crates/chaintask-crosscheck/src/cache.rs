//! Persistent dedup cache of delivered logs, plus the crosscheck checkpoint.
//!
//! Key layout (all under the configured prefix):
//!
//! ```text
//! <prefix><txHash>            coarse entry, covers every log of the tx
//! <prefix><txHash>:<index>    one concrete log
//! <prefix>#checkpoint         next block the engine will scan
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, Instrument, Span};

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::{Store, StoreExt};
use chaintask_core::types::LogIdentity;

use crate::config::CrosscheckConfig;

/// Reserved key suffix for the checkpoint. `#` never appears in a tx hash.
pub const CHECKPOINT_SUFFIX: &str = "#checkpoint";

/// Dedup cache for crosscheck, backed by any [`Store`].
#[derive(Clone)]
pub struct LogCache {
    store: Arc<dyn Store>,
    prefix: String,
    ttl: Option<Duration>,
    span: Span,
}

impl LogCache {
    pub fn new(store: Arc<dyn Store>, prefix: impl Into<String>, ttl: Option<Duration>) -> Self {
        let prefix = prefix.into();
        let span = tracing::debug_span!("log_cache", prefix = %prefix);
        Self { store, prefix, ttl, span }
    }

    pub fn from_config(store: Arc<dyn Store>, config: &CrosscheckConfig) -> Self {
        Self::new(store, config.store_key_prefix.clone(), config.store_ttl())
    }

    /// Replace the span this cache logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn encode(&self, id: &LogIdentity) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Inverse of [`encode`](Self::encode).
    ///
    /// Fails with [`ChainTaskError::Format`] for keys outside the prefix or
    /// not shaped like `tx[:index]`.
    pub fn decode(&self, key: &str) -> Result<LogIdentity, ChainTaskError> {
        let rest = key.strip_prefix(self.prefix.as_str()).ok_or_else(|| {
            ChainTaskError::Format(format!(
                "the prefix '{}' is not a prefix of '{key}'",
                self.prefix
            ))
        })?;

        let mut parts = rest.split(':');
        let tx_hash = parts.next().unwrap_or_default();
        let index = parts.next();
        if parts.next().is_some() || tx_hash.is_empty() {
            return Err(ChainTaskError::Format(format!(
                "expected '{}<tx>[:<index>]', got '{key}'",
                self.prefix
            )));
        }

        let index = match index {
            Some(raw) => Some(raw.parse::<u32>().map_err(|_| {
                ChainTaskError::Format(format!("invalid log index '{raw}' in '{key}'"))
            })?),
            None => None,
        };

        Ok(LogIdentity {
            tx_hash: tx_hash.to_string(),
            index,
        })
    }

    pub fn checkpoint_key(&self) -> String {
        format!("{}{CHECKPOINT_SUFFIX}", self.prefix)
    }

    /// Mark a log as delivered.
    pub async fn add_log(&self, id: &LogIdentity) -> Result<(), ChainTaskError> {
        let key = self.encode(id);
        self.store
            .set(&key, Value::Bool(true), self.ttl)
            .instrument(self.span.clone())
            .await?;
        debug!(parent: &self.span, %key, "log cached");
        Ok(())
    }

    /// Mark several logs, one at a time. Not atomic: a failure leaves the
    /// earlier entries recorded.
    pub async fn add_logs(&self, ids: &[LogIdentity]) -> Result<(), ChainTaskError> {
        for id in ids {
            self.add_log(id).await?;
        }
        Ok(())
    }

    /// Every cached identity, decoded back from the store keys.
    pub async fn get_logs(&self) -> Result<Vec<LogIdentity>, ChainTaskError> {
        let checkpoint_key = self.checkpoint_key();
        let keys = self
            .store
            .keys(Some(&format!("{}*", self.prefix)))
            .instrument(self.span.clone())
            .await?;

        keys.iter()
            .filter(|k| **k != checkpoint_key)
            .map(|k| self.decode(k))
            .collect()
    }

    /// `true` if `id` is cached, either exactly or through a coarse entry
    /// for its transaction.
    pub async fn has(&self, id: &LogIdentity) -> Result<bool, ChainTaskError> {
        if self.store.has(&self.encode(id)).await? {
            return Ok(true);
        }
        if id.index.is_some() {
            return self.store.has(&self.encode(&LogIdentity::tx(id.tx_hash.clone()))).await;
        }
        Ok(false)
    }

    /// Persist the resume point. Checkpoints never expire.
    pub async fn set_checkpoint(&self, block: u64) -> Result<(), ChainTaskError> {
        self.store
            .set_as(&self.checkpoint_key(), &block, None)
            .instrument(self.span.clone())
            .await?;
        debug!(parent: &self.span, block, "checkpoint saved");
        Ok(())
    }

    pub async fn get_checkpoint(&self) -> Result<Option<u64>, ChainTaskError> {
        self.store.get_as(&self.checkpoint_key()).await
    }
}
