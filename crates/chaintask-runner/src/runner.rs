//! Single-flight drain loop for one task flow.
//!
//! `create_task` always persists before it looks at the guard, and a running
//! drain re-queries the store until a query comes back empty, so a task
//! created while a drain is in flight is picked up by that drain.
//!
//! The guard is an in-process flag. Two processes sharing one store can
//! drain the same queue concurrently and handle a task twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use chaintask_core::error::ChainTaskError;
use chaintask_core::store::Store;

use crate::flow::TaskFlow;
use crate::middleware::{run_chain, TaskOutcome};
use crate::task::Task;

/// What `create_task` did after persisting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// This call ran the drain to completion.
    Drained { handled: usize },
    /// This call started a drain on a background task.
    Spawned,
    /// A drain was already running; it will pick the task up.
    Queued,
}

/// Clears the single-flight flag on drop.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Persists tasks for one [`TaskFlow`] and drains them one at a time.
pub struct TaskRunner {
    flow: Arc<TaskFlow>,
    store: Arc<dyn Store>,
    draining: AtomicBool,
    cancel: CancellationToken,
    span: Span,
}

impl TaskRunner {
    pub fn new(flow: TaskFlow, store: Arc<dyn Store>) -> Self {
        let span = tracing::info_span!("task_runner", flow = %flow.name);
        Self {
            flow: Arc::new(flow),
            store,
            draining: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            span,
        }
    }

    /// Replace the span this runner logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn flow(&self) -> &Arc<TaskFlow> {
        &self.flow
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Persist a task under `prefix + key` without draining.
    pub async fn submit(&self, args: Vec<Value>) -> Result<Task, ChainTaskError> {
        let task = Task::new(self.flow.clone(), args);
        task.save(self.store.as_ref()).await?;
        debug!(parent: &self.span, key = task.key(), "Task saved");
        Ok(task)
    }

    /// Persist a task, then drain inline unless a drain is already running.
    pub async fn create_task(&self, args: Vec<Value>) -> Result<CreateOutcome, ChainTaskError> {
        self.submit(args).await?;
        if !self.try_acquire() {
            return Ok(CreateOutcome::Queued);
        }
        let handled = self.drain_held().await?;
        Ok(CreateOutcome::Drained { handled })
    }

    /// Persist a task, then drain on a background task unless a drain is
    /// already running. Returns once the task is persisted.
    pub async fn enqueue(
        self: &Arc<Self>,
        args: Vec<Value>,
    ) -> Result<CreateOutcome, ChainTaskError> {
        self.submit(args).await?;
        if !self.try_acquire() {
            return Ok(CreateOutcome::Queued);
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.drain_held().await {
                warn!(parent: &this.span, error = %e, "Drain aborted");
            }
        });
        Ok(CreateOutcome::Spawned)
    }

    /// Drain every pending task unless a drain is already running. Returns
    /// `None` in that case.
    pub async fn drain_all(&self) -> Result<Option<usize>, ChainTaskError> {
        if !self.try_acquire() {
            return Ok(None);
        }
        self.drain_held().await.map(Some)
    }

    /// Handle tasks persisted by a previous process.
    pub async fn start(&self) -> Result<usize, ChainTaskError> {
        info!(parent: &self.span, prefix = ?self.flow.prefix, "Task runner started");
        Ok(self.drain_all().await?.unwrap_or(0))
    }

    /// Stop draining. Checked between tasks; the task in hand finishes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run drain passes with the guard already held, releasing it on exit.
    async fn drain_held(&self) -> Result<usize, ChainTaskError> {
        let mut handled = 0;
        loop {
            let pass = {
                let _guard = DrainGuard(&self.draining);
                self.drain_pass().instrument(self.span.clone()).await
            };
            handled += pass?;

            // A task saved between the last empty query and the release
            // above saw the guard held and was not drained by anyone.
            if self.cancel.is_cancelled() || self.pending_keys().await?.is_empty() {
                return Ok(handled);
            }
            if !self.try_acquire() {
                return Ok(handled);
            }
        }
    }

    async fn pending_keys(&self) -> Result<Vec<String>, ChainTaskError> {
        let pattern = format!("{}*", self.flow.prefix.resolve());
        self.store.keys(Some(&pattern)).await
    }

    /// Query, handle every key, re-query; until a query returns nothing.
    async fn drain_pass(&self) -> Result<usize, ChainTaskError> {
        let mut handled = 0;
        loop {
            let keys = self.pending_keys().await?;
            if keys.is_empty() {
                break;
            }
            for key in keys {
                if self.cancel.is_cancelled() {
                    info!(handled, "Drain cancelled");
                    return Ok(handled);
                }
                let Some(task) = self.load(&key).await? else {
                    continue;
                };
                let outcome = self.handle(&task).await?;
                debug!(key = task.key(), ?outcome, "Task handled");
                handled += 1;
            }
        }
        if handled > 0 {
            info!(handled, "Drain complete");
        }
        Ok(handled)
    }

    /// Load a pending record. Returns `None` if it vanished; unreadable
    /// records are deleted so they cannot wedge the queue.
    async fn load(&self, key: &str) -> Result<Option<Task>, ChainTaskError> {
        let Some(record) = self.store.get(key).await? else {
            return Ok(None);
        };
        let prefix = self.flow.prefix.resolve();
        let id = key.strip_prefix(prefix.as_str()).unwrap_or(key);
        match Task::restore(self.flow.clone(), id, record) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                warn!(%key, error = %e, "Dropping unreadable task record");
                self.store.del(key).await?;
                Ok(None)
            }
        }
    }

    /// Run one attempt through the middleware chain.
    pub async fn handle(&self, task: &Task) -> Result<TaskOutcome, ChainTaskError> {
        run_chain(self.store.clone(), task)
            .instrument(tracing::debug_span!(parent: &self.span, "task", key = task.key()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::hook_fn;
    use chaintask_storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    fn by_first_arg(flow: TaskFlow) -> TaskFlow {
        flow.key(|args| args[0].as_str().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn terminal_state_after_success_and_failure() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let flow = by_first_arg(TaskFlow::new("t")).handle(|args, _| async move {
            if args[0] == json!("bad") {
                Err(ChainTaskError::Other("rejected".into()))
            } else {
                Ok(())
            }
        });
        let runner = TaskRunner::new(flow, store.clone());

        runner.create_task(vec![json!("good")]).await.unwrap();
        runner.create_task(vec![json!("bad")]).await.unwrap();

        assert!(!store.has("Task:good").await.unwrap());
        assert!(store.has("Done-Task:good").await.unwrap());
        assert!(!store.has("Task:bad").await.unwrap());
        assert!(!store.has("Done-Task:bad").await.unwrap());
        assert!(!runner.is_draining());
    }

    #[tokio::test]
    async fn tasks_created_mid_drain_join_the_running_drain() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let gate = Arc::new(Semaphore::new(0));
        let entered = Arc::new(tokio::sync::Notify::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handled = Arc::new(Mutex::new(Vec::new()));

        let flow = {
            let (gate, entered, active, peak, handled) =
                (gate.clone(), entered.clone(), active.clone(), peak.clone(), handled.clone());
            by_first_arg(TaskFlow::new("t")).handle(move |args, _| {
                let (gate, entered, active, peak, handled) =
                    (gate.clone(), entered.clone(), active.clone(), peak.clone(), handled.clone());
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    if args[0] == json!("e0") {
                        entered.notify_one();
                        let _permit = gate.acquire().await.expect("gate closed");
                    }
                    handled.lock().unwrap().push(args[0].as_str().unwrap_or_default().to_string());
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let runner = Arc::new(TaskRunner::new(flow, store.clone()));

        let first = runner.clone();
        let drain = tokio::spawn(async move { first.create_task(vec![json!("e0")]).await });
        entered.notified().await;
        assert!(runner.is_draining());

        assert_eq!(
            runner.create_task(vec![json!("e1")]).await.unwrap(),
            CreateOutcome::Queued
        );
        assert_eq!(
            runner.create_task(vec![json!("e2")]).await.unwrap(),
            CreateOutcome::Queued
        );
        assert!(store.has("Task:e1").await.unwrap());
        assert!(store.has("Task:e2").await.unwrap());

        gate.add_permits(1);
        let outcome = drain.await.unwrap().unwrap();
        assert_eq!(outcome, CreateOutcome::Drained { handled: 3 });

        let mut seen = handled.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["e0", "e1", "e2"]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        for key in ["e0", "e1", "e2"] {
            assert!(store.has(&format!("Done-Task:{key}")).await.unwrap());
        }
    }

    #[tokio::test]
    async fn start_drains_tasks_left_by_previous_process() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.set("Task:old1", json!(["a"]), None).await.unwrap();
        store.set("Task:old2", json!(["b"]), None).await.unwrap();
        store.set("Task:broken", json!("not-an-array"), None).await.unwrap();
        store.set("Other:x", json!(["c"]), None).await.unwrap();

        let keys = Arc::new(Mutex::new(Vec::new()));
        let sink = keys.clone();
        let flow = TaskFlow::new("t").on_success(hook_fn(move |task| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(task.key().to_string());
                Ok(())
            }
        }));
        let runner = TaskRunner::new(flow, store.clone());

        assert_eq!(runner.start().await.unwrap(), 2);
        let mut keys = keys.lock().unwrap().clone();
        keys.sort();
        assert_eq!(keys, vec!["old1", "old2"]);
        assert!(!store.has("Task:broken").await.unwrap());
        assert!(store.has("Other:x").await.unwrap());
    }

    #[tokio::test]
    async fn stopped_runner_leaves_tasks_pending() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runner = TaskRunner::new(by_first_arg(TaskFlow::new("t")), store.clone());
        runner.stop();

        let outcome = runner.create_task(vec![json!("e1")]).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Drained { handled: 0 });
        assert!(store.has("Task:e1").await.unwrap());
        assert!(!runner.is_draining());
    }

    #[tokio::test]
    async fn enqueue_spawns_background_drain() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let done = Arc::new(tokio::sync::Notify::new());
        let signal = done.clone();
        let flow = by_first_arg(TaskFlow::new("t")).on_success(hook_fn(move |_| {
            let signal = signal.clone();
            async move {
                signal.notify_one();
                Ok(())
            }
        }));
        let runner = Arc::new(TaskRunner::new(flow, store.clone()));

        let outcome = runner.enqueue(vec![json!("e1")]).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Spawned);
        done.notified().await;
        assert!(store.has("Done-Task:e1").await.unwrap());
    }
}
