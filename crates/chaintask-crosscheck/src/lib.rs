//! chaintask-crosscheck — reconciles the live event subscription against the
//! chain.
//!
//! The push subscription can silently drop logs. The [`CrosscheckEngine`]
//! periodically re-scans a trailing block window, diffs the fetched logs
//! against the [`LogCache`] and a static ignore list, and hands every log the
//! subscription missed to a [`MissingLogHandler`], which feeds it back into
//! the same path live events take.
//!
//! ```text
//! tick ──► WindowPlanner::decide ──► CrossChecker::fetch_logs ──► diff
//!                                                                  │
//!     checkpoint = to + 1 ◄── LogCache::add_log ◄── on_missing_log ┘
//! ```

pub mod cache;
pub mod checker;
pub mod config;
pub mod diff;
pub mod engine;
pub mod handler;
pub mod planner;
pub mod provider;

#[cfg(test)]
mod mock;

pub use cache::LogCache;
pub use checker::{CheckRequest, CrossChecker};
pub use config::CrosscheckConfig;
pub use diff::diff;
pub use engine::{CrosscheckEngine, EngineState, TickOutcome};
pub use handler::{missing_log_fn, MissingLogHandler};
pub use planner::{Decision, WindowPlanner};
pub use provider::{BatchLogs, BlockRef, ChainProvider, LogQuery};
