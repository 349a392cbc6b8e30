//! In-memory store backend.
//!
//! Entries carry an optional expiry and are dropped lazily on access.
//! All data is lost when the process exits.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::{pattern_matches, Store};

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

/// In-memory TTL store.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.lock().unwrap().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.lock().unwrap();
        let before = data.len();
        data.retain(|_, e| e.is_live(now));
        let removed = before - data.len();
        if removed > 0 {
            debug!(removed, "purged expired entries");
        }
        removed
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, ChainTaskError> {
        let now = Instant::now();
        let mut data = self.data.lock().unwrap();
        match data.get(key) {
            Some(e) if e.is_live(now) => Ok(Some(e.value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), ChainTaskError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), ChainTaskError> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, ChainTaskError> {
        let now = Instant::now();
        let data = self.data.lock().unwrap();
        Ok(data
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .filter(|(k, _)| pattern.map_or(true, |p| pattern_matches(p, k)))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
