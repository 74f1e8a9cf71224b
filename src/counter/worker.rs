//! Polling worker that drives one [`CounterProcessor`].

use crate::counter::processor::CounterProcessor;
use crate::storage::types::Countable;
use crate::worker::engine::{StepFuture, Worker, WorkerLoop};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

struct CounterLoop<R: Countable> {
    processor: Arc<CounterProcessor<R>>,
    polling_interval: Duration,
}

impl<R: Countable> WorkerLoop for CounterLoop<R> {
    fn run_step(&self) -> StepFuture<'_> {
        Box::pin(async move {
            if self.processor.process_next_records_batch().await {
                // A full batch usually means a backlog; keep going.
                Duration::ZERO
            } else {
                self.polling_interval
            }
        })
    }
}

/// Background counter maintenance for one countable table.
pub struct CounterWorker<R: Countable> {
    processor: Arc<CounterProcessor<R>>,
    worker: Worker,
}

impl<R: Countable> CounterWorker<R> {
    pub fn new(processor: CounterProcessor<R>, polling_interval: Duration) -> Self {
        let processor = Arc::new(processor);
        let task = CounterLoop {
            processor: Arc::clone(&processor),
            polling_interval,
        };
        Self {
            processor,
            worker: Worker::new(format!("counter-{}", R::TABLE), Arc::new(task)),
        }
    }

    pub fn start(&mut self) {
        self.worker.start();
    }

    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }

    /// Takes back counter contributions of records above `last_correct_block`.
    /// Callers stop the worker first so the forward path cannot race the
    /// rollback.
    pub async fn revert(&self, last_correct_block: u64) -> Result<()> {
        self.processor.revert(last_correct_block).await
    }
}
