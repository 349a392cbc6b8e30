//! chaintask-runner — turns events into persisted tasks and drains them.
//!
//! ```text
//! live log ──► EventVerse::on_live_log ─┐
//!                                        ├─► handle_signal ──► TaskRunner::enqueue ──► store
//! crosscheck ─► on_missing_log ─────────┘                              │
//!                                                                      ▼
//!                                   drain: keys(prefix*) ─► [fail, ...middlewares, success]
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use chaintask_runner::{PlanBuilder, TaskFlow};
//!
//! let mut plan = PlanBuilder::new();
//! let transfer = plan.event("Transfer");
//! plan.crosscheck(transfer, crosscheck_config);
//! plan.task(transfer, TaskFlow::new("settle").handle(|args, _task| async move {
//!     settle(&args).await
//! }));
//!
//! let plan = plan.assemble(store, Some(provider))?;
//! plan.play();
//! // feed live logs: plan.event(transfer).on_live_log(&log).await?;
//! ```

pub mod flow;
pub mod middleware;
pub mod plan;
pub mod runner;
pub mod signal;
pub mod task;

pub use flow::{hook_fn, Prefix, TaskFlow, TaskHook};
pub use middleware::{handler_fn, Middleware, Next, TaskOutcome};
pub use plan::{EventId, ExecutionPlan, PlanBuilder, TaskId, CACHE_PREFIX_ROOT};
pub use runner::{CreateOutcome, TaskRunner};
pub use signal::{EventFilterFn, EventVerse, LogDecoder};
pub use task::Task;
