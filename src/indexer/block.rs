//! Block ingestion: fetches the next contiguous range from the chain, guards
//! it against reorgs, and signals a revert when the stored chain diverges.

use crate::runtime::config::IndexerConfig;
use crate::runtime::telemetry::Telemetry;
use crate::storage::interfaces::{BlockStore, ChainSource};
use crate::storage::types::ChainBlock;
use crate::worker::backoff::RetryDelayProvider;
use crate::worker::engine::{StepFuture, Worker, WorkerLoop};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Published when ingestion detects that stored blocks no longer match the
/// chain. The receiver decides how to roll the datastore back; ingestion
/// itself only stops making forward progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertSignal {
    /// Lowest stored block number known to diverge from the chain.
    pub detected_incorrect_block: u64,
}

/// Fetches and stores the next block range, one bounded step at a time.
pub struct BlockProcessor {
    chain: Arc<dyn ChainSource>,
    blocks: Arc<dyn BlockStore>,
    revert_tx: mpsc::Sender<RevertSignal>,
    from_block: u64,
    to_block: Option<u64>,
    batch_size: usize,
    publish_revert_signals: bool,
    telemetry: Arc<Telemetry>,
}

impl BlockProcessor {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        blocks: Arc<dyn BlockStore>,
        revert_tx: mpsc::Sender<RevertSignal>,
        config: &IndexerConfig,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            chain,
            blocks,
            revert_tx,
            from_block: config.from_block(),
            to_block: config.to_block(),
            batch_size: config.blocks_batch_size(),
            publish_revert_signals: !config.disable_revert_signals(),
            telemetry,
        }
    }

    /// Ingests the next contiguous range of blocks.
    ///
    /// Returns `true` when blocks were stored. Returns `false` when caught up
    /// with the chain, when the configured end block is reached, or when the
    /// fetched range failed a reorg check; in the last case a revert signal
    /// may have been raised and nothing is stored.
    pub async fn process_next_range(&self) -> Result<bool> {
        let last_stored = self.blocks.last_block().await?;
        let next_number = last_stored
            .as_ref()
            .map_or(self.from_block, |block| block.number + 1);

        let limit = match self.to_block {
            Some(to_block) if next_number > to_block => return Ok(false),
            Some(to_block) => self.batch_size.min((to_block - next_number + 1) as usize),
            None => self.batch_size,
        };

        let range = self.chain.next_blocks(next_number, limit).await?;
        let Some(first) = range.first() else {
            // Caught up. The tip can still have been replaced under us.
            let Some(stored_tip) = last_stored else {
                return Ok(false);
            };
            let chain_block = self.chain.block_by_number(stored_tip.number).await?;
            if chain_block.map_or(true, |block| block.hash != stored_tip.hash) {
                self.signal_revert(stored_tip.number);
            }
            return Ok(false);
        };

        if let Some(stored_tip) = &last_stored {
            if first.parent_hash != stored_tip.hash {
                self.signal_revert(stored_tip.number);
                return Ok(false);
            }
        }

        if !range_is_linked(&range) {
            // Nothing of this range is stored yet, so there is nothing to
            // revert; wait for the chain to settle and refetch.
            tracing::warn!(
                from = first.number,
                count = range.len(),
                "fetched block range is not hash-linked; dropping it"
            );
            return Ok(false);
        }

        self.blocks.insert_blocks(&range).await?;
        self.telemetry.record_blocks_ingested(range.len() as u64);
        tracing::debug!(
            from = first.number,
            count = range.len(),
            "stored next block range"
        );
        Ok(true)
    }

    fn signal_revert(&self, detected_incorrect_block: u64) {
        self.telemetry.record_revert_signal();
        tracing::warn!(
            detected_incorrect_block,
            "stored chain diverges from the node"
        );
        if !self.publish_revert_signals {
            return;
        }
        if let Err(error) = self
            .revert_tx
            .try_send(RevertSignal {
                detected_incorrect_block,
            })
        {
            // A full channel means an earlier signal is still unhandled; the
            // divergence will be re-detected on the next poll.
            tracing::warn!(%error, detected_incorrect_block, "failed to publish revert signal");
        }
    }
}

fn range_is_linked(range: &[ChainBlock]) -> bool {
    range.windows(2).all(|pair| {
        pair[1].number == pair[0].number + 1 && pair[1].parent_hash == pair[0].hash
    })
}

struct BlockLoop {
    processor: Arc<BlockProcessor>,
    retry_delays: Arc<RetryDelayProvider>,
    polling_interval: Duration,
    telemetry: Arc<Telemetry>,
}

impl WorkerLoop for BlockLoop {
    fn run_step(&self) -> StepFuture<'_> {
        Box::pin(async move {
            let idle = match self.processor.process_next_range().await {
                Ok(true) => {
                    self.retry_delays.reset();
                    Duration::ZERO
                }
                Ok(false) => {
                    self.retry_delays.reset();
                    self.polling_interval
                }
                Err(error) => {
                    self.telemetry.record_worker_error();
                    let error_chain = format!("{error:#}");
                    tracing::error!(error = %error_chain, "failed to process next block range");
                    self.retry_delays.next_delay()
                }
            };
            if !idle.is_zero() {
                tracing::debug!(
                    idle_ms = idle.as_millis() as u64,
                    "waiting before the next block range"
                );
            }
            idle
        })
    }
}

/// Polling service that drives a [`BlockProcessor`] with retry backoff.
pub struct BlockService {
    worker: Worker,
}

impl BlockService {
    pub fn new(
        processor: BlockProcessor,
        retry_delays: Arc<RetryDelayProvider>,
        polling_interval: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let task = BlockLoop {
            processor: Arc::new(processor),
            retry_delays,
            polling_interval,
            telemetry,
        };
        Self {
            worker: Worker::new("block-service", Arc::new(task)),
        }
    }

    pub fn start(&mut self) {
        self.worker.start();
    }

    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}
