//! Chain-of-responsibility task handling.
//!
//! Every attempt runs `[fail wrapper, ...flow middlewares, success wrapper]`.
//! Each element gets the task arguments, the task, and a [`Next`] that runs
//! the rest of the chain.
//!
//! - The **success wrapper** (innermost) writes the done record, removes the
//!   pending record and runs the success hook.
//! - The **fail wrapper** (outermost) catches any error from downstream,
//!   removes the pending record and runs the fail hook. A chain that returns
//!   without ever reaching the success wrapper (a middleware that did not
//!   call `next`) is treated the same way.
//!
//! Exactly one of the two hooks runs per attempt, and the pending record is
//! always gone afterwards.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::Store;

use crate::task::Task;

/// One link of the handling chain.
///
/// Call `next.run().await` to continue; return `Err` to fail the task.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, args: &[Value], task: &Task, next: Next<'_>)
        -> Result<(), ChainTaskError>;
}

/// The remainder of the chain.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    task: &'a Task,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], task: &'a Task) -> Self {
        Self { chain, task }
    }

    /// Run the remaining middlewares. Resolves once the whole downstream
    /// chain has resolved.
    pub async fn run(self) -> Result<(), ChainTaskError> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.call(self.task.args(), self.task, Next::new(rest, self.task))
                    .await
            }
            None => Ok(()),
        }
    }
}

struct HandlerFn<F>(F);

#[async_trait]
impl<F, Fut> Middleware for HandlerFn<F>
where
    F: Fn(Vec<Value>, Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ChainTaskError>> + Send,
{
    async fn call(
        &self,
        args: &[Value],
        task: &Task,
        next: Next<'_>,
    ) -> Result<(), ChainTaskError> {
        (self.0)(args.to_vec(), task.clone()).await?;
        next.run().await
    }
}

/// Wrap an async closure as a middleware that continues the chain after it
/// succeeds.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Vec<Value>, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ChainTaskError>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Done record written, pending record removed.
    Done,
    /// Pending record removed, no done record.
    Failed,
}

/// Per-attempt state shared by the two wrappers.
#[derive(Default)]
struct Attempt {
    succeeded: AtomicBool,
}

struct SuccessWrapper {
    store: Arc<dyn Store>,
    attempt: Arc<Attempt>,
}

#[async_trait]
impl Middleware for SuccessWrapper {
    async fn call(
        &self,
        _args: &[Value],
        task: &Task,
        next: Next<'_>,
    ) -> Result<(), ChainTaskError> {
        task.done(self.store.as_ref()).await?;
        // from here on the fail path must not run
        self.attempt.succeeded.store(true, Ordering::SeqCst);
        if let Err(e) = task.remove(self.store.as_ref()).await {
            warn!(key = task.key(), error = %e, "Removing pending record failed, retrying");
            if let Err(e) = task.remove(self.store.as_ref()).await {
                warn!(
                    key = task.key(),
                    error = %e,
                    "Pending record left behind, it will be drained again"
                );
            }
        }
        if let Some(hook) = &task.flow().on_success {
            hook.call(task).await?;
        }
        next.run().await
    }
}

struct FailWrapper {
    store: Arc<dyn Store>,
    attempt: Arc<Attempt>,
}

impl FailWrapper {
    async fn fail(&self, task: &Task) -> Result<(), ChainTaskError> {
        task.remove(self.store.as_ref()).await?;
        if let Some(hook) = &task.flow().on_fail {
            if let Err(e) = hook.call(task).await {
                warn!(key = task.key(), error = %e, "Fail hook errored");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Middleware for FailWrapper {
    async fn call(
        &self,
        _args: &[Value],
        task: &Task,
        next: Next<'_>,
    ) -> Result<(), ChainTaskError> {
        let result = next.run().await;
        let succeeded = self.attempt.succeeded.load(Ordering::SeqCst);
        match result {
            Ok(()) if succeeded => Ok(()),
            Ok(()) => {
                warn!(
                    key = task.key(),
                    "Middleware chain ended without calling next, failing task"
                );
                self.fail(task).await
            }
            // the task is already done; only the success hook failed
            Err(e) if succeeded => {
                warn!(key = task.key(), error = %e, "Success hook errored");
                Ok(())
            }
            Err(e) => {
                warn!(key = task.key(), error = %e, "Task failed");
                self.fail(task).await
            }
        }
    }
}

/// Run one attempt of `task` through its flow's middlewares, bracketed by
/// the fail and success wrappers.
///
/// Handler errors never surface here; only store errors from the wrappers
/// themselves do.
pub async fn run_chain(store: Arc<dyn Store>, task: &Task) -> Result<TaskOutcome, ChainTaskError> {
    let attempt = Arc::new(Attempt::default());
    let user = &task.flow().middlewares;

    let mut chain: Vec<Arc<dyn Middleware>> = Vec::with_capacity(user.len() + 2);
    chain.push(Arc::new(FailWrapper {
        store: store.clone(),
        attempt: attempt.clone(),
    }));
    chain.extend(user.iter().cloned());
    chain.push(Arc::new(SuccessWrapper {
        store,
        attempt: attempt.clone(),
    }));

    Next::new(&chain, task).run().await?;

    Ok(if attempt.succeeded.load(Ordering::SeqCst) {
        TaskOutcome::Done
    } else {
        TaskOutcome::Failed
    })
}
