//! chaintask-core — shared contracts for the crosscheck + task pipeline.
//!
//! # Architecture
//!
//! ```text
//! live subscription ──┐
//!                     ├──► EventVerse::handle_signal ──► TaskRunner (drain loop)
//! CrosscheckEngine ───┘          (missing logs)              └── Middleware chain
//!        ├── WindowPlanner  (next block range)
//!        ├── LogCache       (dedup + checkpoint, on a Store)
//!        └── ChainProvider  (eth_getLogs / eth_blockNumber)
//! ```
//!
//! This crate only holds what every other crate needs: the [`Store`]
//! contract, the [`ChainTaskError`] taxonomy, the log types and the
//! timeout + retry [`CallPolicy`].

pub mod error;
pub mod retry;
pub mod store;
pub mod types;

pub use error::ChainTaskError;
pub use retry::{Backoff, CallPolicy, CallPolicyConfig};
pub use store::{pattern_matches, Store, StoreExt};
pub use types::{LogFilter, LogIdentity, RawLog, Window};
