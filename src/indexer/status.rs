//! Promotes stored block statuses as the chain's safe and finalized heads
//! advance.

use crate::runtime::telemetry::Telemetry;
use crate::storage::interfaces::{BlockStore, ChainSource};
use crate::storage::types::BlockStatus;
use crate::worker::engine::{StepFuture, Worker, WorkerLoop};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

struct StatusLoop {
    chain: Arc<dyn ChainSource>,
    blocks: Arc<dyn BlockStore>,
    polling_interval: Duration,
    telemetry: Arc<Telemetry>,
}

impl WorkerLoop for StatusLoop {
    fn run_step(&self) -> StepFuture<'_> {
        Box::pin(async move {
            if let Err(error) = self.promote_stored_blocks().await {
                self.telemetry.record_worker_error();
                let error_chain = format!("{error:#}");
                tracing::error!(error = %error_chain, "failed to update block statuses");
            }
            self.polling_interval
        })
    }
}

impl StatusLoop {
    async fn promote_stored_blocks(&self) -> Result<()> {
        // Finalized first; updates are upgrade-only, so the safe pass never
        // touches already-finalized blocks.
        self.promote_to(BlockStatus::Finalized).await?;
        self.promote_to(BlockStatus::Safe).await
    }

    async fn promote_to(&self, status: BlockStatus) -> Result<()> {
        let Some(chain_head) = self.chain.last_block_at(status).await? else {
            return Ok(());
        };
        let Some(first_below) = self.blocks.first_block_below(status).await? else {
            return Ok(());
        };
        if first_below > chain_head.number {
            return Ok(());
        }

        tracing::debug!(
            status = ?status,
            from = first_below,
            to = chain_head.number,
            "promoting stored block statuses"
        );
        self.blocks
            .update_status_range(first_below, chain_head.number, status)
            .await
    }
}

/// Polling service reconciling stored block statuses with the chain.
pub struct BlockStatusService {
    worker: Worker,
}

impl BlockStatusService {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        blocks: Arc<dyn BlockStore>,
        polling_interval: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let task = StatusLoop {
            chain,
            blocks,
            polling_interval,
            telemetry,
        };
        Self {
            worker: Worker::new("block-status", Arc::new(task)),
        }
    }

    pub fn start(&mut self) {
        self.worker.start();
    }

    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}
