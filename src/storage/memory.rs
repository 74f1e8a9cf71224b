//! In-memory implementation of the store traits, used by the test suites and
//! by hosts exercising the engine without a database.

use crate::counter::aggregation::CounterDelta;
use crate::storage::interfaces::{
    BalanceStore, BatchStore, BlockStore, CounterStore, RecordStore, TokenStore,
};
use crate::storage::types::{
    BatchDetails, BatchStage, BlockStatus, ChainBlock, Countable, RecordQuery, StoredBlockRef,
    TokenOffChainData,
};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// One address/token balance row as of a specific block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    pub address: String,
    pub token_address: String,
    pub block_number: u64,
    pub amount: u64,
}

#[derive(Default)]
struct MemoryState {
    blocks: BTreeMap<u64, ChainBlock>,
    batches: BTreeMap<u64, BatchDetails>,
    counters: HashMap<(String, String), i64>,
    cursors: HashMap<String, u64>,
    balances: Vec<BalanceRow>,
    balance_marker: u64,
    bridged_tokens: Vec<String>,
    token_offchain: HashMap<String, TokenOffChainData>,
    tokens_refreshed_at: Option<u64>,
}

/// Memory-backed implementation of every store trait except [`RecordStore`];
/// countable tables live in [`MemoryRecords`].
///
/// All mutation happens under one mutex, which gives batched writes the same
/// atomicity a transactional database would.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory storage lock poisoned")
    }

    /// Current count for one counter row.
    pub fn counter_value(&self, table: &str, query_string: &str) -> Option<i64> {
        self.state()
            .counters
            .get(&(table.to_owned(), query_string.to_owned()))
            .copied()
    }

    /// All counter rows for a table, sorted by query string.
    pub fn counters_for(&self, table: &str) -> Vec<(String, i64)> {
        let state = self.state();
        let mut rows: Vec<(String, i64)> = state
            .counters
            .iter()
            .filter(|((row_table, _), _)| row_table == table)
            .map(|((_, query_string), count)| (query_string.clone(), *count))
            .collect();
        rows.sort();
        rows
    }

    pub fn cursor(&self, table: &str) -> Option<u64> {
        self.state().cursors.get(table).copied()
    }

    pub fn stored_blocks(&self) -> Vec<ChainBlock> {
        self.state().blocks.values().cloned().collect()
    }

    pub fn batch(&self, number: u64) -> Option<BatchDetails> {
        self.state().batches.get(&number).cloned()
    }

    pub fn push_balance(&self, address: &str, token_address: &str, block_number: u64, amount: u64) {
        self.state().balances.push(BalanceRow {
            address: address.to_owned(),
            token_address: token_address.to_owned(),
            block_number,
            amount,
        });
    }

    pub fn balances(&self) -> Vec<BalanceRow> {
        self.state().balances.clone()
    }

    pub fn add_bridged_token(&self, l1_address: &str) {
        self.state().bridged_tokens.push(l1_address.to_owned());
    }

    pub fn token_offchain(&self, l1_address: &str) -> Option<TokenOffChainData> {
        self.state().token_offchain.get(l1_address).cloned()
    }
}

impl CounterStore for MemoryStorage {
    fn last_processed_record_number<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<u64>>> {
        Box::pin(async move { Ok(self.state().cursors.get(table).copied()) })
    }

    fn increment_counters<'a>(
        &'a self,
        table: &'a str,
        deltas: Vec<CounterDelta>,
        new_cursor: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state();
            for delta in deltas {
                *state
                    .counters
                    .entry((delta.table_name, delta.query_string))
                    .or_insert(0) += delta.count as i64;
            }
            state.cursors.insert(table.to_owned(), new_cursor);
            Ok(())
        })
    }

    fn decrement_counters(&self, deltas: Vec<CounterDelta>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state();
            for delta in deltas {
                // Mirrors a SQL UPDATE: decrementing a row that was never
                // incremented is a no-op, not an insert.
                if let Some(count) = state
                    .counters
                    .get_mut(&(delta.table_name, delta.query_string))
                {
                    *count -= delta.count as i64;
                }
            }
            Ok(())
        })
    }

    fn delete_zero_counters(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state().counters.retain(|_, count| *count != 0);
            Ok(())
        })
    }
}

impl BlockStore for MemoryStorage {
    fn last_block(&self) -> BoxFuture<'_, Result<Option<StoredBlockRef>>> {
        Box::pin(async move {
            Ok(self
                .state()
                .blocks
                .values()
                .next_back()
                .map(|block| StoredBlockRef {
                    number: block.number,
                    hash: block.hash.clone(),
                }))
        })
    }

    fn insert_blocks<'a>(&'a self, blocks: &'a [ChainBlock]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state();
            for block in blocks {
                state.blocks.insert(block.number, block.clone());
            }
            Ok(())
        })
    }

    fn first_block_below(&self, status: BlockStatus) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async move {
            Ok(self
                .state()
                .blocks
                .values()
                .find(|block| block.status < status)
                .map(|block| block.number))
        })
    }

    fn update_status_range(
        &self,
        from: u64,
        to: u64,
        status: BlockStatus,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if from > to {
                return Ok(());
            }
            let mut state = self.state();
            for (_, block) in state.blocks.range_mut(from..=to) {
                if block.status < status {
                    block.status = status;
                }
            }
            Ok(())
        })
    }

    fn last_block_in_batch(
        &self,
        batch_number: u64,
    ) -> BoxFuture<'_, Result<Option<StoredBlockRef>>> {
        Box::pin(async move {
            Ok(self
                .state()
                .blocks
                .values()
                .rev()
                .find(|block| block.batch_number == batch_number)
                .map(|block| StoredBlockRef {
                    number: block.number,
                    hash: block.hash.clone(),
                }))
        })
    }

    fn last_executed_block_number(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async move {
            let state = self.state();
            Ok(state
                .blocks
                .values()
                .rev()
                .find(|block| {
                    state
                        .batches
                        .get(&block.batch_number)
                        .map_or(false, |batch| batch.has_reached(BatchStage::Executed))
                })
                .map(|block| block.number))
        })
    }
}

impl BatchStore for MemoryStorage {
    fn last_batch_number(&self, stage: BatchStage) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async move {
            Ok(self
                .state()
                .batches
                .values()
                .rev()
                .find(|batch| batch.has_reached(stage))
                .map(|batch| batch.number))
        })
    }

    fn upsert_batch<'a>(&'a self, batch: &'a BatchDetails) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.state().batches.insert(batch.number, batch.clone());
            Ok(())
        })
    }
}

impl BalanceStore for MemoryStorage {
    fn delete_old_balances(&self, from: u64, to: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state();
            let mut newest: HashMap<(String, String), u64> = HashMap::new();
            for row in state.balances.iter().filter(|row| row.block_number < to) {
                let entry = newest
                    .entry((row.address.clone(), row.token_address.clone()))
                    .or_insert(row.block_number);
                *entry = (*entry).max(row.block_number);
            }
            state.balances.retain(|row| {
                if row.block_number < from || row.block_number >= to {
                    return true;
                }
                newest
                    .get(&(row.address.clone(), row.token_address.clone()))
                    .map_or(true, |latest| row.block_number >= *latest)
            });
            Ok(())
        })
    }

    fn delete_zero_balances(&self, from: u64, to: u64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state().balances.retain(|row| {
                row.amount != 0 || row.block_number < from || row.block_number >= to
            });
            Ok(())
        })
    }

    fn delete_balances_from_block_number(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move { Ok(self.state().balance_marker) })
    }

    fn set_delete_balances_from_block_number(
        &self,
        block_number: u64,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state().balance_marker = block_number;
            Ok(())
        })
    }
}

impl TokenStore for MemoryStorage {
    fn offchain_data_last_updated_at(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        Box::pin(async move { Ok(self.state().tokens_refreshed_at) })
    }

    fn bridged_tokens(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(self.state().bridged_tokens.clone()) })
    }

    fn update_tokens_offchain_data<'a>(
        &'a self,
        updates: &'a [TokenOffChainData],
        updated_at: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state();
            for update in updates {
                state
                    .token_offchain
                    .insert(update.l1_address.clone(), update.clone());
            }
            state.tokens_refreshed_at = Some(updated_at);
            Ok(())
        })
    }
}

/// Memory-backed countable table.
pub struct MemoryRecords<R> {
    rows: Mutex<Vec<R>>,
}

impl<R> Default for MemoryRecords<R> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }
}

impl<R: Countable> MemoryRecords<R> {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<R>> {
        self.rows.lock().expect("memory records lock poisoned")
    }

    pub fn push(&self, record: R) {
        self.rows().push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = R>) {
        self.rows().extend(records);
    }

    /// Hard-deletes records above the given block, the way reverted rows are
    /// dropped from a real datastore.
    pub fn remove_above_block(&self, block_number: u64) {
        self.rows()
            .retain(|record| record.block_number() <= block_number);
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }
}

impl<R: Countable + Clone> RecordStore<R> for MemoryRecords<R> {
    fn find(&self, query: RecordQuery) -> BoxFuture<'_, Result<Vec<R>>> {
        Box::pin(async move {
            let rows = self.rows();
            let mut matched: Vec<R> = rows
                .iter()
                .filter(|record| query.matches(*record))
                .cloned()
                .collect();
            matched.sort_by_key(|record| record.number());
            matched.truncate(query.take);
            Ok(matched)
        })
    }
}
