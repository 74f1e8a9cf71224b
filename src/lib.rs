pub mod counter;
pub mod indexer;
pub mod runtime;
pub mod storage;
pub mod worker;

pub use counter::aggregation::{calculate_counters, CounterCriteria, CounterDelta};
pub use counter::processor::CounterProcessor;
pub use counter::service::CounterService;
pub use counter::worker::CounterWorker;
pub use indexer::balances::BalancesCleanerService;
pub use indexer::batch::{BatchProcessor, BatchService, BatchWorker};
pub use indexer::block::{BlockProcessor, BlockService, RevertSignal};
pub use indexer::status::BlockStatusService;
pub use indexer::token::{TokenDataSaverService, TokenOffChainDataProvider};
pub use runtime::config::{IndexerConfig, IndexerConfigBuilder};
pub use runtime::runner::{Runner, RunnerParams};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use storage::interfaces::{
    BalanceStore, BatchStore, BlockStore, ChainSource, CounterStore, RecordStore, TokenStore,
};
pub use storage::types::{
    BatchDetails, BatchStage, BlockStatus, ChainBlock, Countable, FieldValue, RecordQuery,
    StoredBlockRef, TokenOffChainData,
};
pub use worker::backoff::RetryDelayProvider;
pub use worker::engine::{StepFuture, Worker, WorkerLoop};
pub use worker::wait::{wait_for, wait_for_with_interval};
