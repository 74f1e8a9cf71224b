//! Collaborator contracts the engine is implemented against. Hosts plug in
//! their datastore and chain node behind these traits; the crate ships an
//! in-memory implementation in [`crate::storage::memory`].

use crate::counter::aggregation::CounterDelta;
use crate::storage::types::{
    BatchDetails, BatchStage, BlockStatus, ChainBlock, Countable, RecordQuery, StoredBlockRef,
    TokenOffChainData,
};
use anyhow::Result;
use futures::future::BoxFuture;

/// Read access to one append-only countable table.
pub trait RecordStore<R: Countable>: Send + Sync {
    /// Returns matching records ordered ascending by `number`, at most
    /// `query.take` of them.
    fn find(&self, query: RecordQuery) -> BoxFuture<'_, Result<Vec<R>>>;
}

/// Persistence for materialized counters and the per-table processing cursor.
pub trait CounterStore: Send + Sync {
    /// Durable cursor for the table, or `None` when nothing was processed yet.
    fn last_processed_record_number<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<u64>>>;

    /// Applies all deltas and advances the cursor to `new_cursor` as one
    /// atomic unit with respect to concurrent readers.
    fn increment_counters<'a>(
        &'a self,
        table: &'a str,
        deltas: Vec<CounterDelta>,
        new_cursor: u64,
    ) -> BoxFuture<'a, Result<()>>;

    /// Applies all deltas atomically. Never moves the cursor: records
    /// re-inserted after a revert receive fresh, higher sequence numbers.
    fn decrement_counters(&self, deltas: Vec<CounterDelta>) -> BoxFuture<'_, Result<()>>;

    /// Purges counter rows whose count reached zero.
    fn delete_zero_counters(&self) -> BoxFuture<'_, Result<()>>;
}

/// Persistence for ingested blocks.
pub trait BlockStore: Send + Sync {
    fn last_block(&self) -> BoxFuture<'_, Result<Option<StoredBlockRef>>>;

    /// Persists a contiguous ascending range as one atomic unit.
    fn insert_blocks<'a>(&'a self, blocks: &'a [ChainBlock]) -> BoxFuture<'a, Result<()>>;

    /// Number of the first stored block whose status is below `status`.
    fn first_block_below(&self, status: BlockStatus) -> BoxFuture<'_, Result<Option<u64>>>;

    /// Sets `status` on blocks in `[from, to]`. Upgrade-only: a block
    /// already at a higher status keeps it.
    fn update_status_range(
        &self,
        from: u64,
        to: u64,
        status: BlockStatus,
    ) -> BoxFuture<'_, Result<()>>;

    /// Last stored block of the given batch, if any of its blocks are stored.
    fn last_block_in_batch(
        &self,
        batch_number: u64,
    ) -> BoxFuture<'_, Result<Option<StoredBlockRef>>>;

    /// Number of the last stored block whose containing batch is executed.
    fn last_executed_block_number(&self) -> BoxFuture<'_, Result<Option<u64>>>;
}

/// Persistence for sealed L1 batches.
pub trait BatchStore: Send + Sync {
    /// Highest stored batch number that has reached `stage`.
    fn last_batch_number(&self, stage: BatchStage) -> BoxFuture<'_, Result<Option<u64>>>;

    fn upsert_batch<'a>(&'a self, batch: &'a BatchDetails) -> BoxFuture<'a, Result<()>>;
}

/// Persistence for address/token balances plus the cleaner's low-water-mark.
pub trait BalanceStore: Send + Sync {
    /// Deletes balance rows in `[from, to)` that a newer row below `to`
    /// supersedes.
    fn delete_old_balances(&self, from: u64, to: u64) -> BoxFuture<'_, Result<()>>;

    /// Deletes zero-valued balance rows in `[from, to)`.
    fn delete_zero_balances(&self, from: u64, to: u64) -> BoxFuture<'_, Result<()>>;

    fn delete_balances_from_block_number(&self) -> BoxFuture<'_, Result<u64>>;

    fn set_delete_balances_from_block_number(&self, block_number: u64)
        -> BoxFuture<'_, Result<()>>;
}

/// Persistence for tokens enriched with off-chain market data.
pub trait TokenStore: Send + Sync {
    /// Unix-millisecond timestamp of the last off-chain refresh.
    fn offchain_data_last_updated_at(&self) -> BoxFuture<'_, Result<Option<u64>>>;

    /// L1 addresses of all bridged tokens.
    fn bridged_tokens(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    fn update_tokens_offchain_data<'a>(
        &'a self,
        updates: &'a [TokenOffChainData],
        updated_at: u64,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Read side of the chain node the indexing loops consume.
pub trait ChainSource: Send + Sync {
    /// Latest block the chain reports at the given commitment level.
    /// Meaningful for [`BlockStatus::Safe`] and [`BlockStatus::Finalized`].
    fn last_block_at(&self, status: BlockStatus) -> BoxFuture<'_, Result<Option<ChainBlock>>>;

    fn block_by_number(&self, number: u64) -> BoxFuture<'_, Result<Option<ChainBlock>>>;

    /// Up to `limit` consecutive blocks starting at `from`, clamped at the
    /// chain head.
    fn next_blocks(&self, from: u64, limit: usize) -> BoxFuture<'_, Result<Vec<ChainBlock>>>;

    fn batch_details(&self, number: u64) -> BoxFuture<'_, Result<Option<BatchDetails>>>;
}
