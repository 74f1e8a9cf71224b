use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_BLOCKS_POLLING_INTERVAL_MS: u64 = 1_000;
const DEFAULT_BLOCKS_BATCH_SIZE: usize = 50;
const DEFAULT_BASE_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_BATCHES_POLLING_INTERVAL_MS: u64 = 60_000;
const DEFAULT_BLOCK_STATUS_POLLING_INTERVAL_MS: u64 = 60_000;
const DEFAULT_BALANCES_CLEANUP_INTERVAL_MS: u64 = 300_000;
const DEFAULT_COUNTERS_POLLING_INTERVAL_MS: u64 = 30_000;
const DEFAULT_COUNTER_RECORDS_BATCH_SIZE: usize = 20_000;
const DEFAULT_TOKEN_REFRESH_INTERVAL_MS: u64 = 86_400_000;

/// Runtime configuration for the indexing services.
///
/// Every knob has a production default, so `IndexerConfig::default()` is a
/// valid configuration; overrides go through [`IndexerConfig::builder`],
/// which validates before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    blocks_polling_interval: Duration,
    blocks_batch_size: usize,
    from_block: u64,
    to_block: Option<u64>,
    base_retry_delay: Duration,
    batches_polling_interval: Duration,
    block_status_polling_interval: Duration,
    balances_cleanup_interval: Duration,
    counters_polling_interval: Duration,
    counter_records_batch_size: usize,
    token_refresh_interval: Duration,
    metrics_interval: Duration,
    disable_batch_tracking: bool,
    disable_counters: bool,
    disable_balances_cleaner: bool,
    disable_revert_signals: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            blocks_polling_interval: Duration::from_millis(DEFAULT_BLOCKS_POLLING_INTERVAL_MS),
            blocks_batch_size: DEFAULT_BLOCKS_BATCH_SIZE,
            from_block: 0,
            to_block: None,
            base_retry_delay: Duration::from_millis(DEFAULT_BASE_RETRY_DELAY_MS),
            batches_polling_interval: Duration::from_millis(DEFAULT_BATCHES_POLLING_INTERVAL_MS),
            block_status_polling_interval: Duration::from_millis(
                DEFAULT_BLOCK_STATUS_POLLING_INTERVAL_MS,
            ),
            balances_cleanup_interval: Duration::from_millis(DEFAULT_BALANCES_CLEANUP_INTERVAL_MS),
            counters_polling_interval: Duration::from_millis(DEFAULT_COUNTERS_POLLING_INTERVAL_MS),
            counter_records_batch_size: DEFAULT_COUNTER_RECORDS_BATCH_SIZE,
            token_refresh_interval: Duration::from_millis(DEFAULT_TOKEN_REFRESH_INTERVAL_MS),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            disable_batch_tracking: false,
            disable_counters: false,
            disable_balances_cleaner: false,
            disable_revert_signals: false,
        }
    }
}

impl IndexerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    /// How often block ingestion polls when the chain has nothing new.
    pub fn blocks_polling_interval(&self) -> Duration {
        self.blocks_polling_interval
    }

    /// Maximum number of blocks fetched and stored per ingestion step.
    pub fn blocks_batch_size(&self) -> usize {
        self.blocks_batch_size
    }

    /// First block number to ingest when the store is empty.
    pub fn from_block(&self) -> u64 {
        self.from_block
    }

    /// Optional last block number, after which ingestion idles.
    pub fn to_block(&self) -> Option<u64> {
        self.to_block
    }

    /// First retry delay after an ingestion failure; doubles per consecutive
    /// failure up to a fixed cap.
    pub fn base_retry_delay(&self) -> Duration {
        self.base_retry_delay
    }

    /// How often each batch worker polls for newly sealed batches.
    pub fn batches_polling_interval(&self) -> Duration {
        self.batches_polling_interval
    }

    /// How often stored block statuses are reconciled against the chain.
    pub fn block_status_polling_interval(&self) -> Duration {
        self.block_status_polling_interval
    }

    /// How often superseded and zero balances are cleaned up.
    pub fn balances_cleanup_interval(&self) -> Duration {
        self.balances_cleanup_interval
    }

    /// How often counter workers poll when no new records are waiting.
    pub fn counters_polling_interval(&self) -> Duration {
        self.counters_polling_interval
    }

    /// Maximum number of records aggregated per counter batch.
    pub fn counter_records_batch_size(&self) -> usize {
        self.counter_records_batch_size
    }

    /// How often token off-chain data is refreshed.
    pub fn token_refresh_interval(&self) -> Duration {
        self.token_refresh_interval
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// When set, batch sealing workers are not started.
    pub fn disable_batch_tracking(&self) -> bool {
        self.disable_batch_tracking
    }

    /// When set, counter workers are not started.
    pub fn disable_counters(&self) -> bool {
        self.disable_counters
    }

    /// When set, the balances cleaner is not started.
    pub fn disable_balances_cleaner(&self) -> bool {
        self.disable_balances_cleaner
    }

    /// When set, detected chain divergences are logged but no revert signal
    /// is published.
    pub fn disable_revert_signals(&self) -> bool {
        self.disable_revert_signals
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.blocks_batch_size == 0 {
            bail!("blocks_batch_size must be greater than 0");
        }

        if self.counter_records_batch_size == 0 {
            bail!("counter_records_batch_size must be greater than 0");
        }

        if self.blocks_polling_interval.is_zero() {
            bail!("blocks_polling_interval must be greater than 0");
        }

        if self.base_retry_delay.is_zero() {
            bail!("base_retry_delay must be greater than 0");
        }

        if self.batches_polling_interval.is_zero() {
            bail!("batches_polling_interval must be greater than 0");
        }

        if self.block_status_polling_interval.is_zero() {
            bail!("block_status_polling_interval must be greater than 0");
        }

        if self.balances_cleanup_interval.is_zero() {
            bail!("balances_cleanup_interval must be greater than 0");
        }

        if self.counters_polling_interval.is_zero() {
            bail!("counters_polling_interval must be greater than 0");
        }

        if self.token_refresh_interval.is_zero() {
            bail!("token_refresh_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if let Some(to_block) = self.to_block {
            if to_block < self.from_block {
                bail!(
                    "to_block ({to_block}) must not be below from_block ({})",
                    self.from_block
                );
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IndexerConfigBuilder {
    blocks_polling_interval: Option<Duration>,
    blocks_batch_size: Option<usize>,
    from_block: Option<u64>,
    to_block: Option<u64>,
    base_retry_delay: Option<Duration>,
    batches_polling_interval: Option<Duration>,
    block_status_polling_interval: Option<Duration>,
    balances_cleanup_interval: Option<Duration>,
    counters_polling_interval: Option<Duration>,
    counter_records_batch_size: Option<usize>,
    token_refresh_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    disable_batch_tracking: bool,
    disable_counters: bool,
    disable_balances_cleaner: bool,
    disable_revert_signals: bool,
}

impl IndexerConfigBuilder {
    pub fn blocks_polling_interval(mut self, interval: Duration) -> Self {
        self.blocks_polling_interval = Some(interval);
        self
    }

    pub fn blocks_batch_size(mut self, size: usize) -> Self {
        self.blocks_batch_size = Some(size);
        self
    }

    pub fn from_block(mut self, number: u64) -> Self {
        self.from_block = Some(number);
        self
    }

    pub fn to_block(mut self, number: u64) -> Self {
        self.to_block = Some(number);
        self
    }

    pub fn base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = Some(delay);
        self
    }

    pub fn batches_polling_interval(mut self, interval: Duration) -> Self {
        self.batches_polling_interval = Some(interval);
        self
    }

    pub fn block_status_polling_interval(mut self, interval: Duration) -> Self {
        self.block_status_polling_interval = Some(interval);
        self
    }

    pub fn balances_cleanup_interval(mut self, interval: Duration) -> Self {
        self.balances_cleanup_interval = Some(interval);
        self
    }

    pub fn counters_polling_interval(mut self, interval: Duration) -> Self {
        self.counters_polling_interval = Some(interval);
        self
    }

    pub fn counter_records_batch_size(mut self, size: usize) -> Self {
        self.counter_records_batch_size = Some(size);
        self
    }

    pub fn token_refresh_interval(mut self, interval: Duration) -> Self {
        self.token_refresh_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn disable_batch_tracking(mut self, disabled: bool) -> Self {
        self.disable_batch_tracking = disabled;
        self
    }

    pub fn disable_counters(mut self, disabled: bool) -> Self {
        self.disable_counters = disabled;
        self
    }

    pub fn disable_balances_cleaner(mut self, disabled: bool) -> Self {
        self.disable_balances_cleaner = disabled;
        self
    }

    pub fn disable_revert_signals(mut self, disabled: bool) -> Self {
        self.disable_revert_signals = disabled;
        self
    }

    pub fn build(self) -> Result<IndexerConfig> {
        let defaults = IndexerConfig::default();
        let config = IndexerConfig {
            blocks_polling_interval: self
                .blocks_polling_interval
                .unwrap_or(defaults.blocks_polling_interval),
            blocks_batch_size: self.blocks_batch_size.unwrap_or(defaults.blocks_batch_size),
            from_block: self.from_block.unwrap_or(defaults.from_block),
            to_block: self.to_block.or(defaults.to_block),
            base_retry_delay: self.base_retry_delay.unwrap_or(defaults.base_retry_delay),
            batches_polling_interval: self
                .batches_polling_interval
                .unwrap_or(defaults.batches_polling_interval),
            block_status_polling_interval: self
                .block_status_polling_interval
                .unwrap_or(defaults.block_status_polling_interval),
            balances_cleanup_interval: self
                .balances_cleanup_interval
                .unwrap_or(defaults.balances_cleanup_interval),
            counters_polling_interval: self
                .counters_polling_interval
                .unwrap_or(defaults.counters_polling_interval),
            counter_records_batch_size: self
                .counter_records_batch_size
                .unwrap_or(defaults.counter_records_batch_size),
            token_refresh_interval: self
                .token_refresh_interval
                .unwrap_or(defaults.token_refresh_interval),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
            disable_batch_tracking: self.disable_batch_tracking,
            disable_counters: self.disable_counters,
            disable_balances_cleaner: self.disable_balances_cleaner,
            disable_revert_signals: self.disable_revert_signals,
        };

        config.validate()?;
        Ok(config)
    }
}
