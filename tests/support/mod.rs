#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use blocktally::storage::memory::MemoryStorage;
use blocktally::{
    BalanceStore, BatchDetails, BatchStage, BlockStatus, ChainBlock, ChainSource, Countable,
    FieldValue, TokenStore,
};
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

#[derive(Default)]
struct ChainScript {
    blocks: Vec<ChainBlock>,
    fork_epoch: u32,
    safe_head: Option<u64>,
    finalized_head: Option<u64>,
    batches: HashMap<u64, BatchDetails>,
    failures_left: usize,
}

/// Scriptable [`ChainSource`]: tests append canonical blocks, move the safe
/// and finalized heads, rewrite history above a chosen block, and inject
/// transient call failures.
#[derive(Default)]
pub struct MemoryChain {
    script: Mutex<ChainScript>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, ChainScript> {
        self.script.lock().expect("chain script lock poisoned")
    }

    /// Appends `count` linked blocks sealed into `batch_number`.
    pub fn extend_chain(&self, count: usize, batch_number: u64) {
        let mut script = self.script();
        let fork_epoch = script.fork_epoch;
        for _ in 0..count {
            let number = script.blocks.len() as u64;
            let parent_hash = script
                .blocks
                .last()
                .map_or_else(|| "0x".to_owned(), |block| block.hash.clone());
            script.blocks.push(ChainBlock {
                number,
                hash: fork_hash(fork_epoch, number),
                parent_hash,
                batch_number,
                status: BlockStatus::Included,
                timestamp: 1_693_000_000_000 + number,
            });
        }
    }

    /// Drops every block above `block_number`; blocks appended afterwards get
    /// hashes that differ from the dropped ones.
    pub fn fork_above(&self, block_number: u64) {
        let mut script = self.script();
        script.blocks.truncate(block_number as usize + 1);
        script.fork_epoch += 1;
    }

    /// Rewrites one block's hash in place, leaving its child's parent hash
    /// stale.
    pub fn corrupt_hash(&self, block_number: u64) {
        let mut script = self.script();
        if let Some(block) = script.blocks.get_mut(block_number as usize) {
            block.hash = format!("0xbad{block_number:07x}");
        }
    }

    pub fn set_safe_head(&self, block_number: u64) {
        self.script().safe_head = Some(block_number);
    }

    pub fn set_finalized_head(&self, block_number: u64) {
        self.script().finalized_head = Some(block_number);
    }

    pub fn put_batch(&self, batch: BatchDetails) {
        self.script().batches.insert(batch.number, batch);
    }

    /// The next `count` chain calls fail with a scripted error.
    pub fn fail_next_calls(&self, count: usize) {
        self.script().failures_left = count;
    }

    pub fn height(&self) -> Option<u64> {
        self.script().blocks.last().map(|block| block.number)
    }

    pub fn hash_at(&self, block_number: u64) -> Option<String> {
        self.script()
            .blocks
            .get(block_number as usize)
            .map(|block| block.hash.clone())
    }

    fn scripted_failure(&self) -> Result<()> {
        let mut script = self.script();
        if script.failures_left > 0 {
            script.failures_left -= 1;
            bail!("scripted chain failure");
        }
        Ok(())
    }
}

fn fork_hash(fork_epoch: u32, number: u64) -> String {
    format!("0x{fork_epoch:02x}{number:010x}")
}

impl ChainSource for MemoryChain {
    fn last_block_at(&self, status: BlockStatus) -> BoxFuture<'_, Result<Option<ChainBlock>>> {
        Box::pin(async move {
            self.scripted_failure()?;
            let script = self.script();
            let head = match status {
                BlockStatus::Included => script.blocks.last().map(|block| block.number),
                BlockStatus::Safe => script.safe_head,
                BlockStatus::Finalized => script.finalized_head,
            };
            Ok(head.and_then(|number| script.blocks.get(number as usize).cloned()))
        })
    }

    fn block_by_number(&self, number: u64) -> BoxFuture<'_, Result<Option<ChainBlock>>> {
        Box::pin(async move {
            self.scripted_failure()?;
            Ok(self.script().blocks.get(number as usize).cloned())
        })
    }

    fn next_blocks(&self, from: u64, limit: usize) -> BoxFuture<'_, Result<Vec<ChainBlock>>> {
        Box::pin(async move {
            self.scripted_failure()?;
            let script = self.script();
            let start = (from as usize).min(script.blocks.len());
            Ok(script.blocks[start..].iter().take(limit).cloned().collect())
        })
    }

    fn batch_details(&self, number: u64) -> BoxFuture<'_, Result<Option<BatchDetails>>> {
        Box::pin(async move {
            self.scripted_failure()?;
            Ok(self.script().batches.get(&number).cloned())
        })
    }
}

/// Minimal countable row shaped like an explorer transactions table.
#[derive(Clone, Debug)]
pub struct Transaction {
    pub number: u64,
    pub block_number: u64,
    pub from: String,
    pub to: String,
}

impl Countable for Transaction {
    const TABLE: &'static str = "transactions";

    fn number(&self) -> u64 {
        self.number
    }

    fn block_number(&self) -> u64 {
        self.block_number
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "number" => FieldValue::numeric(self.number),
            "blockNumber" => FieldValue::numeric(self.block_number),
            "from" => FieldValue::text(self.from.as_str()),
            "to" => FieldValue::text(self.to.as_str()),
            _ => FieldValue::Undefined,
        }
    }
}

pub fn transaction(number: u64, block_number: u64, from: &str, to: &str) -> Transaction {
    Transaction {
        number,
        block_number,
        from: from.to_owned(),
        to: to.to_owned(),
    }
}

/// Countable row with a nullable dimension, shaped like a token transfers
/// table.
#[derive(Clone, Debug)]
pub struct Transfer {
    pub number: u64,
    pub block_number: u64,
    pub token_address: Option<String>,
}

impl Countable for Transfer {
    const TABLE: &'static str = "transfers";

    fn number(&self) -> u64 {
        self.number
    }

    fn block_number(&self) -> u64 {
        self.block_number
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "number" => FieldValue::numeric(self.number),
            "blockNumber" => FieldValue::numeric(self.block_number),
            "tokenAddress" => match &self.token_address {
                Some(address) => FieldValue::text(address.as_str()),
                None => FieldValue::Null,
            },
            _ => FieldValue::Undefined,
        }
    }
}

pub fn transfer(number: u64, block_number: u64, token_address: Option<&str>) -> Transfer {
    Transfer {
        number,
        block_number,
        token_address: token_address.map(str::to_owned),
    }
}

pub fn committed_batch(number: u64) -> BatchDetails {
    BatchDetails {
        number,
        timestamp: 1_693_000_500_000 + number,
        root_hash: Some(format!("0xroot{number:04x}")),
        committed_at: Some(1_693_000_600_000 + number),
        proven_at: None,
        executed_at: None,
    }
}

pub fn executed_batch(number: u64) -> BatchDetails {
    let mut batch = committed_batch(number);
    batch.proven_at = Some(1_693_000_700_000 + number);
    batch.executed_at = Some(1_693_000_800_000 + number);
    batch
}

pub async fn wait_for_stored_blocks(
    storage: &MemoryStorage,
    target: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let stored = storage.stored_blocks().len() as u64;
        if stored >= target {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("storage did not reach {target} stored blocks within {timeout:?} (stored: {stored})");
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub async fn wait_for_cursor(
    storage: &MemoryStorage,
    table: &str,
    target: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let cursor = storage.cursor(table);
        if cursor.map_or(false, |number| number >= target) {
            return Ok(());
        }
        if start.elapsed() > timeout {
            let reported = cursor
                .map(|number| number.to_string())
                .unwrap_or_else(|| "<none>".to_owned());
            bail!(
                "counter cursor for {table} did not reach {target} within {timeout:?} (cursor: {reported})"
            );
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub async fn wait_for_block_status(
    storage: &MemoryStorage,
    block_number: u64,
    status: BlockStatus,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = storage
            .stored_blocks()
            .into_iter()
            .find(|block| block.number == block_number)
            .map(|block| block.status);
        if current == Some(status) {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!(
                "stored block {block_number} did not reach {status:?} within {timeout:?} (current: {current:?})"
            );
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub async fn wait_for_sealed_batch(
    storage: &MemoryStorage,
    batch_number: u64,
    stage: BatchStage,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if storage
            .batch(batch_number)
            .map_or(false, |batch| batch.has_reached(stage))
        {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("batch {batch_number} did not reach {stage:?} in storage within {timeout:?}");
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub async fn wait_for_token_refresh(storage: &MemoryStorage, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        if storage.offchain_data_last_updated_at().await?.is_some() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("token off-chain data was not refreshed within {timeout:?}");
        }
        sleep(POLL_INTERVAL).await;
    }
}

pub async fn wait_for_balance_marker(
    storage: &MemoryStorage,
    target: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let marker = storage.delete_balances_from_block_number().await?;
        if marker >= target {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!(
                "balance cleanup marker did not reach {target} within {timeout:?} (marker: {marker})"
            );
        }
        sleep(POLL_INTERVAL).await;
    }
}
