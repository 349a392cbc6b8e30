//! Event fan-out: one decoded event becomes one task per attached runner.
//!
//! Live and recovered logs take the same path. Both are decoded into the
//! event's arguments, the raw log is appended as the last argument, and the
//! result goes through [`EventVerse::handle_signal`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, Instrument, Span};

use chaintask_core::error::ChainTaskError;
use chaintask_core::types::RawLog;
use chaintask_crosscheck::{LogCache, MissingLogHandler};

use crate::runner::TaskRunner;

/// Decodes a raw log into event arguments (ABI decoding lives outside this
/// crate).
pub trait LogDecoder: Send + Sync {
    fn decode(&self, log: &RawLog) -> Result<Vec<Value>, ChainTaskError>;
}

impl<F> LogDecoder for F
where
    F: Fn(&RawLog) -> Result<Vec<Value>, ChainTaskError> + Send + Sync,
{
    fn decode(&self, log: &RawLog) -> Result<Vec<Value>, ChainTaskError> {
        self(log)
    }
}

/// Event-level gate run before any task is created. Return `false` to drop
/// the event.
pub type EventFilterFn = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// Runtime for one subscribed event.
pub struct EventVerse {
    name: String,
    filter: Option<EventFilterFn>,
    decoder: Option<Arc<dyn LogDecoder>>,
    runners: Vec<Arc<TaskRunner>>,
    cache: Option<LogCache>,
    span: Span,
}

impl EventVerse {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let span = tracing::info_span!("event", name = %name);
        Self {
            name,
            filter: None,
            decoder: None,
            runners: Vec::new(),
            cache: None,
            span,
        }
    }

    pub fn with_filter(mut self, filter: EventFilterFn) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn LogDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_runner(mut self, runner: Arc<TaskRunner>) -> Self {
        self.runners.push(runner);
        self
    }

    /// Cache that live deliveries are recorded in, so crosscheck skips them.
    pub fn with_cache(mut self, cache: LogCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runners(&self) -> &[Arc<TaskRunner>] {
        &self.runners
    }

    pub fn cache(&self) -> Option<&LogCache> {
        self.cache.as_ref()
    }

    /// Decoded arguments followed by the raw log itself.
    pub fn event_args(&self, log: &RawLog) -> Result<Vec<Value>, ChainTaskError> {
        let mut args = match &self.decoder {
            Some(decoder) => decoder.decode(log)?,
            None => Vec::new(),
        };
        args.push(serde_json::to_value(log)?);
        Ok(args)
    }

    /// Run the filter, then create a task on every runner. Returns the
    /// number of tasks created.
    ///
    /// Each task is persisted before this returns; draining happens in the
    /// background.
    pub async fn handle_signal(&self, args: Vec<Value>) -> Result<usize, ChainTaskError> {
        if let Some(filter) = &self.filter {
            if !filter(&args) {
                debug!(parent: &self.span, "Event filtered out");
                return Ok(0);
            }
        }
        for runner in &self.runners {
            runner
                .enqueue(args.clone())
                .instrument(self.span.clone())
                .await?;
        }
        Ok(self.runners.len())
    }

    /// Entry point for the live subscription. The log is cache-marked only
    /// after its tasks are persisted.
    pub async fn on_live_log(&self, log: &RawLog) -> Result<usize, ChainTaskError> {
        let created = self.handle_signal(self.event_args(log)?).await?;
        if let Some(cache) = &self.cache {
            cache.add_log(&log.identity()).await?;
        }
        Ok(created)
    }
}

#[async_trait]
impl MissingLogHandler for EventVerse {
    async fn on_missing_log(&self, log: &RawLog) -> Result<(), ChainTaskError> {
        debug!(
            parent: &self.span,
            tx = %log.tx_hash,
            block = log.block_number_u64(),
            "Replaying missed log"
        );
        self.handle_signal(self.event_args(log)?).await?;
        Ok(())
    }
}
