//! A persisted unit of work.

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::Store;

use crate::flow::TaskFlow;

/// Event arguments plus a lazily derived key.
///
/// Records are stored as a JSON array of the arguments under
/// `prefix + key` while pending and `done_prefix + key` once handled.
#[derive(Clone)]
pub struct Task {
    flow: Arc<TaskFlow>,
    args: Vec<Value>,
    key: OnceLock<String>,
}

impl Task {
    pub fn new(flow: Arc<TaskFlow>, args: Vec<Value>) -> Self {
        Self {
            flow,
            args,
            key: OnceLock::new(),
        }
    }

    /// Rebuild a task from a stored record.
    pub fn restore(
        flow: Arc<TaskFlow>,
        key: impl Into<String>,
        record: Value,
    ) -> Result<Self, ChainTaskError> {
        let args: Vec<Value> = serde_json::from_value(record)?;
        let task = Self::new(flow, args);
        let _ = task.key.set(key.into());
        Ok(task)
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn flow(&self) -> &TaskFlow {
        &self.flow
    }

    /// Derived once through the flow's key function, then cached.
    pub fn key(&self) -> &str {
        self.key.get_or_init(|| (self.flow.key_fn)(&self.args))
    }

    pub fn pending_key(&self) -> String {
        format!("{}{}", self.flow.prefix.resolve(), self.key())
    }

    pub fn done_key(&self) -> String {
        format!("{}{}", self.flow.done_prefix.resolve(), self.key())
    }

    fn record(&self) -> Value {
        Value::Array(self.args.clone())
    }

    /// Persist as pending.
    pub async fn save(&self, store: &dyn Store) -> Result<(), ChainTaskError> {
        store.set(&self.pending_key(), self.record(), self.flow.ttl).await
    }

    /// Write the done record.
    pub async fn done(&self, store: &dyn Store) -> Result<(), ChainTaskError> {
        store.set(&self.done_key(), self.record(), self.flow.done_ttl).await
    }

    /// Delete the pending record.
    pub async fn remove(&self, store: &dyn Store) -> Result<(), ChainTaskError> {
        store.del(&self.pending_key()).await
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("flow", &self.flow.name)
            .field("key", &self.key.get())
            .field("args", &self.args)
            .finish()
    }
}
