//! Task flow definition: where tasks live in the store, how they are keyed,
//! and what handles them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use chaintask_core::error::ChainTaskError;

use crate::middleware::{handler_fn, Middleware};
use crate::task::Task;

pub const DEFAULT_TASK_PREFIX: &str = "Task:";
pub const DEFAULT_DONE_PREFIX: &str = "Done-Task:";
pub const DEFAULT_TASK_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_DONE_TTL: Duration = Duration::from_secs(60);

/// Derives a task key from its event arguments.
pub type KeyFn = Arc<dyn Fn(&[Value]) -> String + Send + Sync>;

/// Random 8-hex-digit key.
pub fn random_key(_args: &[Value]) -> String {
    let mut key = uuid::Uuid::new_v4().simple().to_string();
    key.truncate(8);
    key
}

/// A store key prefix, fixed or computed at use time.
#[derive(Clone)]
pub enum Prefix {
    Static(String),
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl Prefix {
    pub fn dynamic(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self) -> String {
        match self {
            Self::Static(s) => s.clone(),
            Self::Dynamic(f) => f(),
        }
    }

    pub fn as_static(&self) -> Option<&str> {
        match self {
            Self::Static(s) => Some(s),
            Self::Dynamic(_) => None,
        }
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(s) => write!(f, "{s:?}"),
            Self::Dynamic(_) => write!(f, "<dynamic>"),
        }
    }
}

impl From<&str> for Prefix {
    fn from(s: &str) -> Self {
        Self::Static(s.to_string())
    }
}

impl From<String> for Prefix {
    fn from(s: String) -> Self {
        Self::Static(s)
    }
}

/// Runs after a task reaches a terminal state.
#[async_trait]
pub trait TaskHook: Send + Sync {
    async fn call(&self, task: &Task) -> Result<(), ChainTaskError>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F, Fut> TaskHook for FnHook<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ChainTaskError>> + Send,
{
    async fn call(&self, task: &Task) -> Result<(), ChainTaskError> {
        (self.0)(task.clone()).await
    }
}

/// Wrap an async closure as a [`TaskHook`].
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn TaskHook>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ChainTaskError>> + Send + 'static,
{
    Arc::new(FnHook(f))
}

/// Everything a [`TaskRunner`](crate::runner::TaskRunner) needs to know
/// about one kind of task.
///
/// ```rust,ignore
/// let flow = TaskFlow::new("transfer")
///     .prefix("Transfer:", "Done-Transfer:")
///     .key(|args| args[0].as_str().unwrap_or_default().to_string())
///     .handle(|args, task| async move { settle(args).await });
/// ```
#[derive(Clone)]
pub struct TaskFlow {
    pub name: String,
    pub prefix: Prefix,
    pub done_prefix: Prefix,
    /// TTL of pending records. `None` = never expire.
    pub ttl: Option<Duration>,
    /// TTL of done records. `None` = never expire.
    pub done_ttl: Option<Duration>,
    pub key_fn: KeyFn,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub on_success: Option<Arc<dyn TaskHook>>,
    pub on_fail: Option<Arc<dyn TaskHook>>,
}

impl TaskFlow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: DEFAULT_TASK_PREFIX.into(),
            done_prefix: DEFAULT_DONE_PREFIX.into(),
            ttl: Some(DEFAULT_TASK_TTL),
            done_ttl: Some(DEFAULT_DONE_TTL),
            key_fn: Arc::new(random_key),
            middlewares: Vec::new(),
            on_success: None,
            on_fail: None,
        }
    }

    pub fn prefix(mut self, prefix: impl Into<Prefix>, done_prefix: impl Into<Prefix>) -> Self {
        self.prefix = prefix.into();
        self.done_prefix = done_prefix.into();
        self
    }

    pub fn ttl(mut self, ttl: Option<Duration>, done_ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self.done_ttl = done_ttl;
        self
    }

    /// Replace the key derivation. A deterministic key (e.g. from the tx
    /// hash) makes task creation idempotent under replays.
    pub fn key(mut self, f: impl Fn(&[Value]) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Arc::new(f);
        self
    }

    /// Append a middleware.
    pub fn use_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Append a terminal-style handler; `next` is called for it on success.
    pub fn handle<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Vec<Value>, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ChainTaskError>> + Send + 'static,
    {
        self.use_middleware(handler_fn(f))
    }

    pub fn on_success(mut self, hook: Arc<dyn TaskHook>) -> Self {
        self.on_success = Some(hook);
        self
    }

    pub fn on_fail(mut self, hook: Arc<dyn TaskHook>) -> Self {
        self.on_fail = Some(hook);
        self
    }
}

impl fmt::Debug for TaskFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFlow")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("done_prefix", &self.done_prefix)
            .field("ttl", &self.ttl)
            .field("done_ttl", &self.done_ttl)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}
