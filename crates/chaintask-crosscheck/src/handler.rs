//! Missing-log callback.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use chaintask_core::error::ChainTaskError;
use chaintask_core::types::RawLog;

/// Receives every log the live subscription missed, in ascending chain order.
///
/// A log is marked seen only after this returns `Ok`. Returning `Err` aborts
/// the current window without advancing the checkpoint, so the log is offered
/// again on the next tick.
#[async_trait]
pub trait MissingLogHandler: Send + Sync {
    async fn on_missing_log(&self, log: &RawLog) -> Result<(), ChainTaskError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MissingLogHandler for FnHandler<F>
where
    F: Fn(RawLog) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ChainTaskError>> + Send,
{
    async fn on_missing_log(&self, log: &RawLog) -> Result<(), ChainTaskError> {
        (self.0)(log.clone()).await
    }
}

/// Wrap an async closure as a [`MissingLogHandler`].
///
/// ```rust,ignore
/// let handler = missing_log_fn(|log| async move {
///     println!("recovered {}", log.tx_hash);
///     Ok(())
/// });
/// ```
pub fn missing_log_fn<F, Fut>(f: F) -> Arc<dyn MissingLogHandler>
where
    F: Fn(RawLog) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ChainTaskError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
