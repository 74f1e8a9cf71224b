//! Batch sealing: one worker per commitment stage mirrors batches from the
//! chain into the store once their blocks are safely ingested.

use crate::runtime::telemetry::Telemetry;
use crate::storage::interfaces::{BatchStore, BlockStore, ChainSource};
use crate::storage::types::BatchStage;
use crate::worker::engine::{StepFuture, Worker, WorkerLoop};
use anyhow::Result;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Seals batches that have reached one specific [`BatchStage`].
///
/// The next batch number to check is cached in memory between polls. The
/// cache is dropped on every unproductive or failed poll, so each retry
/// starts from the durable store again.
pub struct BatchProcessor {
    stage: BatchStage,
    chain: Arc<dyn ChainSource>,
    batches: Arc<dyn BatchStore>,
    blocks: Arc<dyn BlockStore>,
    telemetry: Arc<Telemetry>,
    next_batch_number: Mutex<Option<u64>>,
}

impl BatchProcessor {
    pub fn new(
        stage: BatchStage,
        chain: Arc<dyn ChainSource>,
        batches: Arc<dyn BatchStore>,
        blocks: Arc<dyn BlockStore>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            stage,
            chain,
            batches,
            blocks,
            telemetry,
            next_batch_number: Mutex::new(None),
        }
    }

    pub fn stage(&self) -> BatchStage {
        self.stage
    }

    /// Checks the chain for the next batch at this stage and stores it when
    /// its blocks are ingested and still canonical.
    ///
    /// Returns `true` when a batch was stored, so the caller polls again
    /// immediately. Failures are logged and reported as `false`.
    pub async fn process_next_batch(&self) -> bool {
        match self.try_process_next_batch().await {
            Ok(sealed) => sealed,
            Err(error) => {
                self.telemetry.record_worker_error();
                let error_chain = format!("{error:#}");
                tracing::error!(
                    stage = self.stage.as_str(),
                    batch_number = ?self.cached_next_batch(),
                    error = %error_chain,
                    "failed to process next batch"
                );
                self.reset_state();
                false
            }
        }
    }

    async fn try_process_next_batch(&self) -> Result<bool> {
        let batch_number = match self.cached_next_batch() {
            Some(number) => number,
            None => {
                let last = self.batches.last_batch_number(self.stage).await?;
                let next = last.map_or(0, |number| number + 1);
                self.set_cached_next_batch(Some(next));
                next
            }
        };

        let Some(batch) = self.chain.batch_details(batch_number).await? else {
            tracing::debug!(
                stage = self.stage.as_str(),
                batch_number,
                "no next batch on the chain yet"
            );
            self.reset_state();
            return Ok(false);
        };

        if !batch.has_reached(self.stage) {
            tracing::debug!(
                stage = self.stage.as_str(),
                batch_number,
                batch_stage = batch.stage().as_str(),
                "next batch has not reached this stage yet"
            );
            self.reset_state();
            return Ok(false);
        }

        // Only seal once at least one of the batch's blocks is ingested and
        // that block is still on the canonical chain; otherwise the batch row
        // could outlive a revert of its blocks.
        let Some(stored_block) = self.blocks.last_block_in_batch(batch.number).await? else {
            tracing::debug!(
                stage = self.stage.as_str(),
                batch_number,
                "batch blocks are not ingested yet"
            );
            self.reset_state();
            return Ok(false);
        };

        let chain_block = self.chain.block_by_number(stored_block.number).await?;
        if chain_block.map_or(true, |block| block.hash != stored_block.hash) {
            tracing::debug!(
                stage = self.stage.as_str(),
                batch_number,
                block_number = stored_block.number,
                "stored batch block diverges from the chain; waiting for revert"
            );
            self.reset_state();
            return Ok(false);
        }

        self.batches.upsert_batch(&batch).await?;
        self.set_cached_next_batch(Some(batch.number + 1));
        self.telemetry.record_batch_sealed();
        tracing::debug!(
            stage = self.stage.as_str(),
            batch_number = batch.number,
            "stored batch"
        );
        Ok(true)
    }

    /// Drops the cached batch cursor so the next poll re-reads the store.
    pub fn reset_state(&self) {
        self.set_cached_next_batch(None);
    }

    fn cached_next_batch(&self) -> Option<u64> {
        *self
            .next_batch_number
            .lock()
            .expect("batch cursor lock poisoned")
    }

    fn set_cached_next_batch(&self, value: Option<u64>) {
        *self
            .next_batch_number
            .lock()
            .expect("batch cursor lock poisoned") = value;
    }
}

struct BatchLoop {
    processor: Arc<BatchProcessor>,
    polling_interval: Duration,
}

impl WorkerLoop for BatchLoop {
    fn run_step(&self) -> StepFuture<'_> {
        Box::pin(async move {
            if self.processor.process_next_batch().await {
                Duration::ZERO
            } else {
                self.polling_interval
            }
        })
    }
}

/// Polling worker around one stage's [`BatchProcessor`].
pub struct BatchWorker {
    processor: Arc<BatchProcessor>,
    worker: Worker,
}

impl BatchWorker {
    pub fn new(processor: BatchProcessor, polling_interval: Duration) -> Self {
        let processor = Arc::new(processor);
        let task = BatchLoop {
            processor: Arc::clone(&processor),
            polling_interval,
        };
        let name = format!("batch-{}", processor.stage().as_str());
        Self {
            processor,
            worker: Worker::new(name, Arc::new(task)),
        }
    }

    pub fn start(&mut self) {
        self.worker.start();
    }

    /// Clears the processor's cached cursor, then waits for the in-flight
    /// poll to finish, so a later `start` begins from durable state.
    pub async fn stop(&mut self) {
        self.processor.reset_state();
        self.worker.stop().await;
    }
}

/// One [`BatchWorker`] per commitment stage.
pub struct BatchService {
    workers: Vec<BatchWorker>,
}

impl BatchService {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        batches: Arc<dyn BatchStore>,
        blocks: Arc<dyn BlockStore>,
        polling_interval: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let workers = BatchStage::ALL
            .iter()
            .map(|stage| {
                BatchWorker::new(
                    BatchProcessor::new(
                        *stage,
                        Arc::clone(&chain),
                        Arc::clone(&batches),
                        Arc::clone(&blocks),
                        Arc::clone(&telemetry),
                    ),
                    polling_interval,
                )
            })
            .collect();
        Self { workers }
    }

    pub fn start(&mut self) {
        for worker in &mut self.workers {
            worker.start();
        }
    }

    pub async fn stop(&mut self) {
        join_all(self.workers.iter_mut().map(|worker| worker.stop())).await;
    }
}
