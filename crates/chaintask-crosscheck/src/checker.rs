//! One-shot crosschecks against the chain.
//!
//! [`CrossChecker`] fetches logs for a block range and replays the ones not
//! covered by an ignore list. It keeps no state; the long-running
//! [`CrosscheckEngine`](crate::engine::CrosscheckEngine) layers the cache and
//! checkpoint on top of it.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use chaintask_core::error::ChainTaskError;
use chaintask_core::retry::CallPolicy;
use chaintask_core::types::{LogFilter, LogIdentity, RawLog, Window};

use crate::config::{CrosscheckConfig, ETH_BLOCK_COUNT_ONE_HOUR};
use crate::diff::diff;
use crate::handler::MissingLogHandler;
use crate::provider::{ChainProvider, LogQuery};

/// What to check and where recovered logs go.
#[derive(Clone, Copy)]
pub struct CheckRequest<'a> {
    pub filter: &'a LogFilter,
    pub ignore: &'a [LogIdentity],
    pub handler: &'a dyn MissingLogHandler,
}

/// Fetches logs under a [`CallPolicy`] and replays the missing ones.
pub struct CrossChecker {
    provider: Arc<dyn ChainProvider>,
    policy: CallPolicy,
    group_limit: Option<usize>,
}

impl CrossChecker {
    pub fn new(provider: Arc<dyn ChainProvider>) -> Self {
        Self {
            provider,
            policy: CallPolicy::default(),
            group_limit: None,
        }
    }

    /// Use the call policy and address grouping from `config`.
    pub fn from_config(provider: Arc<dyn ChainProvider>, config: &CrosscheckConfig) -> Self {
        Self {
            provider,
            policy: config.call_policy(),
            group_limit: config.address_group_limit,
        }
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_group_limit(mut self, limit: Option<usize>) -> Self {
        self.group_limit = limit;
        self
    }

    /// Current chain head.
    pub async fn head(&self) -> Result<u64, ChainTaskError> {
        let block = self
            .policy
            .call("eth_getBlockByNumber(latest)", || self.provider.latest_block())
            .await?;
        Ok(block.number)
    }

    /// Fetch every log in `window` matching `filter`, in ascending chain
    /// order. Removed (reorged) logs are dropped.
    ///
    /// Addresses are split into groups of at most `address_group_limit`. If
    /// the provider supports batching, all groups go out in one request;
    /// otherwise they are issued concurrently.
    pub async fn fetch_logs(
        &self,
        filter: &LogFilter,
        window: Window,
    ) -> Result<Vec<RawLog>, ChainTaskError> {
        let queries: Vec<LogQuery> = filter
            .address_groups(self.group_limit)
            .into_iter()
            .map(|addresses| LogQuery::new(addresses, filter.topics.clone(), window))
            .collect();

        let groups = match self.provider.batch_logs() {
            Some(batch) if queries.len() > 1 => {
                self.policy
                    .call("eth_getLogs[batch]", || batch.get_logs_batch(&queries))
                    .await?
            }
            _ => {
                try_join_all(queries.iter().map(|query| {
                    self.policy
                        .call("eth_getLogs", move || self.provider.get_logs(query))
                }))
                .await?
            }
        };

        let mut logs: Vec<RawLog> = groups
            .into_iter()
            .flatten()
            .filter(|log| !log.is_removed())
            .collect();
        logs.sort_by_key(RawLog::position);

        debug!(
            %window,
            groups = queries.len(),
            logs = logs.len(),
            "Fetched logs"
        );
        Ok(logs)
    }

    /// Replay every log in `window` not covered by `req.ignore`. Returns the
    /// number of logs handed to the handler.
    ///
    /// Stops at the first handler failure.
    pub async fn cross_check_range(
        &self,
        req: CheckRequest<'_>,
        window: Window,
    ) -> Result<usize, ChainTaskError> {
        let logs = self.fetch_logs(req.filter, window).await?;
        let missing = diff(&logs, req.ignore);
        for log in &missing {
            req.handler
                .on_missing_log(log)
                .await
                .map_err(|e| ChainTaskError::callback("on_missing_log", e))?;
        }
        if !missing.is_empty() {
            info!(%window, recovered = missing.len(), "Crosscheck recovered logs");
        }
        Ok(missing.len())
    }

    /// Check the last `retro_block_count` blocks: `[head - retro, head]`.
    pub async fn cross_check_retro(
        &self,
        req: CheckRequest<'_>,
        retro_block_count: u64,
    ) -> Result<Window, ChainTaskError> {
        if retro_block_count < ETH_BLOCK_COUNT_ONE_HOUR {
            warn!(
                retro_block_count,
                recommended = ETH_BLOCK_COUNT_ONE_HOUR,
                "Crosscheck range is shorter than one hour of blocks"
            );
        }
        let head = self.head().await?;
        let window = Window::new(head.saturating_sub(retro_block_count), head);
        self.cross_check_range(req, window).await?;
        Ok(window)
    }

    /// Check `[from_block, head]`. Returns the head so the caller can
    /// continue from `head + 1`.
    pub async fn cross_check_from(
        &self,
        req: CheckRequest<'_>,
        from_block: u64,
    ) -> Result<u64, ChainTaskError> {
        let head = self.head().await?;
        if from_block > head {
            debug!(from_block, head, "Nothing to crosscheck yet");
            return Ok(head);
        }
        if head - from_block < ETH_BLOCK_COUNT_ONE_HOUR {
            warn!(
                from_block,
                head,
                recommended = ETH_BLOCK_COUNT_ONE_HOUR,
                "Crosscheck range is shorter than one hour of blocks"
            );
        }
        self.cross_check_range(req, Window::new(from_block, head))
            .await?;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::missing_log_fn;
    use crate::mock::{log_at, MockProvider};
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, Arc<dyn MissingLogHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = missing_log_fn(move |log: RawLog| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(log.identity().to_string());
                Ok(())
            }
        });
        (seen, handler)
    }

    #[tokio::test]
    async fn range_replays_unignored_in_order() {
        let provider = Arc::new(MockProvider::new(200));
        provider.push_log(log_at("0xabc", 105, "0xb", 1));
        provider.push_log(log_at("0xabc", 101, "0xa", 0));
        provider.push_log(log_at("0xabc", 150, "0xc", 0)); // outside window

        let checker = CrossChecker::new(provider.clone());
        let (seen, handler) = recorder();
        let filter = LogFilter::address("0xabc");
        let ignore = vec![LogIdentity::tx("0xa")];
        let req = CheckRequest {
            filter: &filter,
            ignore: &ignore,
            handler: handler.as_ref(),
        };

        let n = checker
            .cross_check_range(req, Window::new(100, 109))
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["0xb:1".to_string()]);
    }

    #[tokio::test]
    async fn removed_logs_are_dropped() {
        let provider = Arc::new(MockProvider::new(200));
        let mut reorged = log_at("0xabc", 101, "0xa", 0);
        reorged.removed = Some(true);
        provider.push_log(reorged);

        let checker = CrossChecker::new(provider);
        let logs = checker
            .fetch_logs(&LogFilter::address("0xabc"), Window::new(100, 109))
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn grouped_addresses_without_batch_issue_one_call_per_group() {
        let provider = Arc::new(MockProvider::new(200));
        provider.push_log(log_at("0x1", 100, "0xa", 0));
        provider.push_log(log_at("0x3", 100, "0xb", 1));
        let filter = LogFilter {
            addresses: vec!["0x1".into(), "0x2".into(), "0x3".into()],
            topics: vec![],
        };

        let checker = CrossChecker::new(provider.clone()).with_group_limit(Some(2));
        let logs = checker.fetch_logs(&filter, Window::new(100, 100)).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(provider.get_logs_calls(), 2);
        assert_eq!(provider.batch_calls(), 0);
    }

    #[tokio::test]
    async fn grouped_addresses_use_batch_capability() {
        let provider = Arc::new(MockProvider::new(200).with_batch());
        provider.push_log(log_at("0x1", 100, "0xa", 0));
        provider.push_log(log_at("0x3", 100, "0xb", 1));
        let filter = LogFilter {
            addresses: vec!["0x1".into(), "0x2".into(), "0x3".into()],
            topics: vec![],
        };

        let checker = CrossChecker::new(provider.clone()).with_group_limit(Some(1));
        let logs = checker.fetch_logs(&filter, Window::new(100, 100)).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(provider.batch_calls(), 1);
        assert_eq!(provider.get_logs_calls(), 0);
    }

    #[tokio::test]
    async fn retro_and_from_use_head() {
        let provider = Arc::new(MockProvider::new(1000));
        provider.push_log(log_at("0xabc", 990, "0xa", 0));
        let checker = CrossChecker::new(provider);
        let (seen, handler) = recorder();
        let filter = LogFilter::address("0xabc");
        let req = CheckRequest {
            filter: &filter,
            ignore: &[],
            handler: handler.as_ref(),
        };

        let window = checker.cross_check_retro(req, 20).await.unwrap();
        assert_eq!(window, Window::new(980, 1000));
        assert_eq!(seen.lock().unwrap().len(), 1);

        let head = checker.cross_check_from(req, 995).await.unwrap();
        assert_eq!(head, 1000);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_provider_errors_are_retried() {
        let provider = Arc::new(MockProvider::new(200));
        provider.push_log(log_at("0xabc", 100, "0xa", 0));
        provider.fail_next(2);

        let checker = CrossChecker::new(provider.clone());
        let logs = checker
            .fetch_logs(&LogFilter::address("0xabc"), Window::new(100, 100))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(provider.get_logs_calls(), 3);
    }

    #[tokio::test]
    async fn handler_failure_surfaces_as_callback_error() {
        let provider = Arc::new(MockProvider::new(200));
        provider.push_log(log_at("0xabc", 100, "0xa", 0));
        let checker = CrossChecker::new(provider);
        let handler = missing_log_fn(|_| async { Err(ChainTaskError::Other("boom".into())) });
        let filter = LogFilter::address("0xabc");
        let req = CheckRequest {
            filter: &filter,
            ignore: &[],
            handler: handler.as_ref(),
        };

        let err = checker
            .cross_check_range(req, Window::new(100, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainTaskError::Callback { .. }));
    }
}
