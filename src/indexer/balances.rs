//! Periodic cleanup of balance rows that newer executed blocks supersede.

use crate::runtime::telemetry::Telemetry;
use crate::storage::interfaces::{BalanceStore, BlockStore};
use crate::worker::engine::{StepFuture, Worker, WorkerLoop};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

struct CleanerLoop {
    balances: Arc<dyn BalanceStore>,
    blocks: Arc<dyn BlockStore>,
    cleanup_interval: Duration,
    telemetry: Arc<Telemetry>,
}

impl WorkerLoop for CleanerLoop {
    fn run_step(&self) -> StepFuture<'_> {
        Box::pin(async move {
            match self.clean_next_range().await {
                Ok(true) => self.telemetry.record_balance_cleanup(),
                Ok(false) => {}
                Err(error) => {
                    self.telemetry.record_worker_error();
                    let error_chain = format!("{error:#}");
                    tracing::error!(error = %error_chain, "failed to clean up balances");
                }
            }
            self.cleanup_interval
        })
    }
}

impl CleanerLoop {
    /// Cleans `[marker, last_executed)` and advances the marker to the end of
    /// the cleaned range.
    ///
    /// The marker moves only after both deletes succeed, so a failed run is
    /// simply repeated in full. Balances above the last executed block stay
    /// untouched: those blocks can still be reverted.
    async fn clean_next_range(&self) -> Result<bool> {
        let from_block = self.balances.delete_balances_from_block_number().await?;
        let Some(to_block) = self.blocks.last_executed_block_number().await? else {
            return Ok(false);
        };
        if from_block >= to_block {
            return Ok(false);
        }

        self.balances.delete_old_balances(from_block, to_block).await?;
        self.balances.delete_zero_balances(from_block, to_block).await?;
        self.balances
            .set_delete_balances_from_block_number(to_block)
            .await?;

        tracing::debug!(
            from_block,
            to_block,
            "deleted superseded and zero balances"
        );
        Ok(true)
    }
}

/// Polling service that trims balance history below the executed-block line.
pub struct BalancesCleanerService {
    worker: Worker,
}

impl BalancesCleanerService {
    pub fn new(
        balances: Arc<dyn BalanceStore>,
        blocks: Arc<dyn BlockStore>,
        cleanup_interval: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let task = CleanerLoop {
            balances,
            blocks,
            cleanup_interval,
            telemetry,
        };
        Self {
            worker: Worker::new("balances-cleaner", Arc::new(task)),
        }
    }

    pub fn start(&mut self) {
        self.worker.start();
    }

    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}
