//! The key-value store contract shared by the log cache and task queues.
//!
//! Crosscheck cache entries and task records may live in the same physical
//! store. Non-overlapping key prefixes are the only isolation between them;
//! there are no transactions.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ChainTaskError;

/// A TTL-capable key-value store.
///
/// Implementations include `MemoryStore` and `SqliteStore` in
/// `chaintask-storage`. All methods must be safe to call concurrently.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a value. Expired entries read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Value>, ChainTaskError>;

    /// Write a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), ChainTaskError>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), ChainTaskError>;

    /// List live keys matching `pattern` (see [`pattern_matches`]); all keys
    /// when `pattern` is `None`. Order is unspecified.
    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, ChainTaskError>;

    /// `true` when `key` holds a live value.
    async fn has(&self, key: &str) -> Result<bool, ChainTaskError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Typed helpers over any [`Store`].
#[async_trait]
pub trait StoreExt: Store {
    async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ChainTaskError> {
        match self.get(key).await? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn set_as<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), ChainTaskError> {
        let v = serde_json::to_value(value)?;
        self.set(key, v, ttl).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// Glob matching as used by [`Store::keys`].
///
/// Only two forms are supported: an exact key, or a prefix followed by a
/// single trailing `*` (`"Task:*"`).
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_pattern() {
        assert!(pattern_matches("Task:*", "Task:abc"));
        assert!(pattern_matches("Task:*", "Task:"));
        assert!(!pattern_matches("Task:*", "Done-Task:abc"));
        assert!(pattern_matches("*", "anything"));
    }

    #[test]
    fn exact_pattern() {
        assert!(pattern_matches("cc:0xabc", "cc:0xabc"));
        assert!(!pattern_matches("cc:0xabc", "cc:0xabc:1"));
    }
}
