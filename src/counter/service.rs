//! Lifecycle and revert fan-out over the counter workers of every countable
//! table.

use crate::counter::worker::CounterWorker;
use crate::storage::interfaces::CounterStore;
use crate::storage::types::Countable;
use anyhow::Result;
use futures::future::{join_all, BoxFuture};
use std::sync::Arc;

/// Object-safe view of a [`CounterWorker`], so workers over different entity
/// types can be driven together.
trait EntityCounterWorker: Send {
    fn start(&mut self);
    fn stop(&mut self) -> BoxFuture<'_, ()>;
    fn revert(&self, last_correct_block: u64) -> BoxFuture<'_, Result<()>>;
}

impl<R: Countable> EntityCounterWorker for CounterWorker<R> {
    fn start(&mut self) {
        CounterWorker::start(self);
    }

    fn stop(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(CounterWorker::stop(self))
    }

    fn revert(&self, last_correct_block: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(CounterWorker::revert(self, last_correct_block))
    }
}

/// Owns one [`CounterWorker`] per countable table and exposes a single
/// start/stop/revert surface over all of them.
pub struct CounterService {
    workers: Vec<Box<dyn EntityCounterWorker>>,
    counters: Arc<dyn CounterStore>,
}

impl CounterService {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self {
            workers: Vec::new(),
            counters,
        }
    }

    pub fn register<R: Countable>(&mut self, worker: CounterWorker<R>) {
        self.workers.push(Box::new(worker));
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn start(&mut self) {
        for worker in &mut self.workers {
            worker.start();
        }
    }

    pub async fn stop(&mut self) {
        join_all(self.workers.iter_mut().map(|worker| worker.stop())).await;
    }

    /// Reverts every table's counters past the rollback point, then purges
    /// rows whose count reached zero. Workers must be stopped first.
    pub async fn revert(&self, last_correct_block: u64) -> Result<()> {
        let results = join_all(
            self.workers
                .iter()
                .map(|worker| worker.revert(last_correct_block)),
        )
        .await;
        for result in results {
            result?;
        }
        self.counters.delete_zero_counters().await
    }
}
