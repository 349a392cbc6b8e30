//! In-memory chain provider for tests.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use chaintask_core::error::ChainTaskError;
use chaintask_core::types::RawLog;

use crate::provider::{BatchLogs, ChainProvider, LogQuery};

pub(crate) fn log_at(address: &str, block: u64, tx: &str, index: u32) -> RawLog {
    RawLog {
        address: address.into(),
        topics: vec!["0xtopic".into()],
        data: "0x".into(),
        block_number: format!("0x{block:x}"),
        block_hash: String::new(),
        tx_hash: tx.into(),
        log_index: format!("0x{index:x}"),
        removed: None,
    }
}

pub(crate) struct MockProvider {
    head: AtomicU64,
    logs: Mutex<Vec<RawLog>>,
    batch: bool,
    failures: AtomicU32,
    head_calls: AtomicUsize,
    get_logs_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(Vec::new()),
            batch: false,
            failures: AtomicU32::new(0),
            head_calls: AtomicUsize::new(0),
            get_logs_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_batch(mut self) -> Self {
        self.batch = true;
        self
    }

    pub(crate) fn push_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    /// Make the next `n` log fetches fail with a transient error.
    pub(crate) fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn head_calls(&self) -> usize {
        self.head_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn get_logs_calls(&self) -> usize {
        self.get_logs_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Result<(), ChainTaskError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(ChainTaskError::Provider("503 Service Unavailable".into()));
        }
        Ok(())
    }

    fn query(&self, q: &LogQuery) -> Vec<RawLog> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| {
                let n = l.block_number_u64();
                n >= q.from_block
                    && n <= q.to_block
                    && (q.addresses.is_empty() || q.addresses.contains(&l.address))
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChainProvider for MockProvider {
    async fn block_number(&self) -> Result<u64, ChainTaskError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<RawLog>, ChainTaskError> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(self.query(query))
    }

    fn batch_logs(&self) -> Option<&dyn BatchLogs> {
        if self.batch {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl BatchLogs for MockProvider {
    async fn get_logs_batch(
        &self,
        queries: &[LogQuery],
    ) -> Result<Vec<Vec<RawLog>>, ChainTaskError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(queries.iter().map(|q| self.query(q)).collect())
    }
}
