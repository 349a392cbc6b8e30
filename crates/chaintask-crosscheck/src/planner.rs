//! Reconciliation window planning.
//!
//! Decides, each tick, whether a scan runs and over which block range.
//!
//! - **Bounded mode** (`to_block` set): windows are clamped to `to_block` and
//!   always scanned; the run ends once the checkpoint passes `to_block`.
//! - **Continuous mode**: a window is scanned only once the chain head is at
//!   least `delay_block_from_latest` blocks past its end; never ends.

use chaintask_core::error::ChainTaskError;
use chaintask_core::types::Window;

use crate::config::CrosscheckConfig;

/// What the engine should do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Scan this window.
    Scan(Window),
    /// The window is not confirmed yet; try again next tick.
    Wait { window: Window, head: u64 },
    /// Bounded run completed.
    Finished,
}

/// Computes scan windows from the checkpoint.
#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    batch_blocks_count: u64,
    to_block: Option<u64>,
    delay_block_from_latest: u64,
}

impl WindowPlanner {
    /// Build a planner from a validated config.
    pub fn from_config(config: &CrosscheckConfig) -> Result<Self, ChainTaskError> {
        Self::validate(config)?;
        Ok(Self {
            batch_blocks_count: config.batch_blocks(),
            to_block: config.to_block,
            delay_block_from_latest: config.delay_block_from_latest,
        })
    }

    /// Reject window parameters that can never work. Runs before any RPC.
    pub fn validate(config: &CrosscheckConfig) -> Result<(), ChainTaskError> {
        if config.batch_blocks_count == Some(0) {
            return Err(ChainTaskError::Config(
                "should batchBlocksCount >= 1".into(),
            ));
        }

        match config.to_block {
            Some(to_block) => {
                let from_block = config.from_block.ok_or_else(|| {
                    ChainTaskError::Config("need fromBlock when toBlock presents".into())
                })?;
                if to_block < from_block {
                    return Err(ChainTaskError::Config(format!(
                        "should fromBlock <= toBlock (got {from_block} > {to_block})"
                    )));
                }
            }
            None => {
                if let (Some(polling), Some(batch)) =
                    (config.polling_interval_ms, config.batch_blocks_count)
                {
                    let limit = batch.saturating_mul(config.block_interval_ms);
                    if polling > limit {
                        return Err(ChainTaskError::Config(format!(
                            "should pollingInterval <= batchBlocksCount * blockInterval \
                             ({polling}ms > {limit}ms) when no toBlock is set, \
                             otherwise crosscheck never catches up with the chain"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Where to start: explicit config, else persisted checkpoint. `None`
    /// means start at the current chain head.
    pub fn resume_point(explicit: Option<u64>, persisted: Option<u64>) -> Option<u64> {
        explicit.or(persisted)
    }

    pub fn is_bounded(&self) -> bool {
        self.to_block.is_some()
    }

    /// `[checkpoint, checkpoint + batch - 1]`, clamped in bounded mode.
    pub fn window(&self, checkpoint: u64) -> Window {
        let to = checkpoint.saturating_add(self.batch_blocks_count - 1);
        match self.to_block {
            Some(limit) => Window::new(checkpoint, to.min(limit)),
            None => Window::new(checkpoint, to),
        }
    }

    pub fn is_finished(&self, checkpoint: u64) -> bool {
        self.to_block.map_or(false, |to| checkpoint > to)
    }

    /// Decide this tick. `head` is only consulted in continuous mode, where a
    /// missing head means wait.
    pub fn decide(&self, checkpoint: u64, head: Option<u64>) -> Decision {
        if self.is_finished(checkpoint) {
            return Decision::Finished;
        }
        let window = self.window(checkpoint);
        if self.is_bounded() {
            return Decision::Scan(window);
        }
        let ready_at = window.to_block.saturating_add(self.delay_block_from_latest);
        match head {
            Some(head) if ready_at <= head => Decision::Scan(window),
            Some(head) => Decision::Wait { window, head },
            None => Decision::Wait { window, head: 0 },
        }
    }
}
