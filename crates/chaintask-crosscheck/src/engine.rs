//! The long-running crosscheck loop.
//!
//! # State machine
//!
//! ```text
//! Idle ──start()──► Running ──stop() / bounded run finished / fatal error──► Stopped
//! ```
//!
//! Each tick asks the [`WindowPlanner`] for a window, fetches its logs,
//! replays those found in neither the static ignore list nor the
//! [`LogCache`], and only then advances the checkpoint to `to_block + 1`.
//! A failed tick leaves the checkpoint where it was, so the same window is
//! scanned again on the next tick.

use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument, Span};

use chaintask_core::error::ChainTaskError;
use chaintask_core::types::Window;

use crate::cache::LogCache;
use crate::checker::CrossChecker;
use crate::config::CrosscheckConfig;
use crate::diff::diff;
use crate::handler::MissingLogHandler;
use crate::planner::{Decision, WindowPlanner};
use crate::provider::ChainProvider;

/// Lifecycle of a [`CrosscheckEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The window was scanned and the checkpoint advanced past it.
    Scanned { window: Window, recovered: usize },
    /// The window is not confirmed yet.
    Skipped { window: Window, head: u64 },
    /// Bounded mode reached `to_block`.
    Finished,
}

/// Periodically re-scans trailing windows and replays logs the live
/// subscription missed.
pub struct CrosscheckEngine {
    checker: CrossChecker,
    cache: LogCache,
    planner: WindowPlanner,
    config: CrosscheckConfig,
    handler: Arc<dyn MissingLogHandler>,
    checkpoint: Mutex<Option<u64>>,
    state: Mutex<EngineState>,
    cancel: CancellationToken,
    span: Span,
}

impl CrosscheckEngine {
    /// Build an engine. Fails with [`ChainTaskError::Config`] on invalid
    /// window parameters, before any provider call is made.
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        cache: LogCache,
        config: CrosscheckConfig,
        handler: Arc<dyn MissingLogHandler>,
    ) -> Result<Self, ChainTaskError> {
        let planner = WindowPlanner::from_config(&config)?;
        let span = tracing::info_span!("crosscheck", prefix = %config.store_key_prefix);
        Ok(Self {
            checker: CrossChecker::from_config(provider, &config),
            cache,
            planner,
            config,
            handler,
            checkpoint: Mutex::new(None),
            state: Mutex::new(EngineState::Idle),
            cancel: CancellationToken::new(),
            span,
        })
    }

    /// Replace the span this engine logs under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Tie this engine to an outer cancellation token (e.g. a child of a
    /// plan-wide token).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cache(&self) -> &LogCache {
        &self.cache
    }

    pub fn config(&self) -> &CrosscheckConfig {
        &self.config
    }

    /// The next block to scan, once initialized.
    pub fn checkpoint(&self) -> Option<u64> {
        *self.checkpoint.lock().unwrap()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    /// Load the resume point (explicit `from_block`, else the persisted
    /// checkpoint, else the chain head) and persist it. Idempotent.
    pub async fn init(&self) -> Result<u64, ChainTaskError> {
        if let Some(cp) = self.checkpoint() {
            return Ok(cp);
        }
        let persisted = self.cache.get_checkpoint().await?;
        let from = match WindowPlanner::resume_point(self.config.from_block, persisted) {
            Some(block) => block,
            None => self.checker.head().await?,
        };
        self.cache.set_checkpoint(from).await?;
        *self.checkpoint.lock().unwrap() = Some(from);

        info!(
            parent: &self.span,
            from_block = from,
            persisted = ?persisted,
            to_block = ?self.config.to_block,
            "Crosscheck resume point"
        );
        Ok(from)
    }

    /// Run one iteration: plan, scan, replay, advance.
    pub async fn tick(&self) -> Result<TickOutcome, ChainTaskError> {
        self.tick_inner().instrument(self.span.clone()).await
    }

    async fn tick_inner(&self) -> Result<TickOutcome, ChainTaskError> {
        let checkpoint = self.init().await?;
        let head = if self.planner.is_bounded() {
            None
        } else {
            Some(self.checker.head().await?)
        };

        match self.planner.decide(checkpoint, head) {
            Decision::Finished => Ok(TickOutcome::Finished),
            Decision::Wait { window, head } => {
                debug!(%window, head, "Window not confirmed yet, skipping tick");
                Ok(TickOutcome::Skipped { window, head })
            }
            Decision::Scan(window) => {
                let recovered = self.reconcile(window).await?;
                let next = window.to_block.saturating_add(1);
                self.cache.set_checkpoint(next).await?;
                *self.checkpoint.lock().unwrap() = Some(next);
                debug!(%window, recovered, checkpoint = next, "Window reconciled");
                Ok(TickOutcome::Scanned { window, recovered })
            }
        }
    }

    /// Replay every log in `window` missing from both the ignore list and the
    /// cache. Each log is cache-marked only after its handler succeeds.
    async fn reconcile(&self, window: Window) -> Result<usize, ChainTaskError> {
        let logs = self.checker.fetch_logs(&self.config.filter, window).await?;
        let mut recovered = 0;
        for log in diff(&logs, &self.config.ignore_logs) {
            let id = log.identity();
            if self.cache.has(&id).await? {
                continue;
            }
            self.handler
                .on_missing_log(&log)
                .await
                .map_err(|e| ChainTaskError::callback("on_missing_log", e))?;
            self.cache.add_log(&id).await?;
            recovered += 1;
            info!(
                log = %id,
                block = log.block_number_u64(),
                "Recovered missing log"
            );
        }
        Ok(recovered)
    }

    /// Run the polling loop until [`stop`](Self::stop) is called, a bounded
    /// run finishes, or a fatal error occurs.
    ///
    /// Ticks are spaced at least `polling_interval` apart. Transient and
    /// callback errors are logged and the same window is retried next tick.
    pub async fn start(&self) -> Result<(), ChainTaskError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == EngineState::Running {
                return Err(ChainTaskError::Other("crosscheck already running".into()));
            }
            *state = EngineState::Running;
        }
        info!(
            parent: &self.span,
            polling_ms = self.config.polling_interval().as_millis() as u64,
            batch = self.config.batch_blocks(),
            "Crosscheck started"
        );

        let result = self.run_loop().await;
        *self.state.lock().unwrap() = EngineState::Stopped;
        result
    }

    async fn run_loop(&self) -> Result<(), ChainTaskError> {
        let interval = self.config.polling_interval();
        loop {
            if self.cancel.is_cancelled() {
                info!(parent: &self.span, checkpoint = ?self.checkpoint(), "Crosscheck stopped");
                return Ok(());
            }

            let started = Instant::now();
            match self.tick().await {
                Ok(TickOutcome::Finished) => {
                    info!(parent: &self.span, to_block = ?self.config.to_block, "Crosscheck finished");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(parent: &self.span, error = %e, "Crosscheck aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        parent: &self.span,
                        error = %e,
                        checkpoint = ?self.checkpoint(),
                        "Crosscheck tick failed, will retry the same window"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(started + interval) => {}
            }
        }
    }

    /// Ask the loop to exit. In-flight calls are not aborted; the loop
    /// observes the request before its next tick.
    pub fn stop(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock().unwrap();
        if *state == EngineState::Idle {
            *state = EngineState::Stopped;
        }
    }
}
