use crate::counter::service::CounterService;
use crate::indexer::balances::BalancesCleanerService;
use crate::indexer::batch::BatchService;
use crate::indexer::block::{BlockProcessor, BlockService, RevertSignal};
use crate::indexer::status::BlockStatusService;
use crate::indexer::token::{TokenDataSaverService, TokenOffChainDataProvider};
use crate::runtime::config::IndexerConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::storage::interfaces::{BalanceStore, BatchStore, BlockStore, ChainSource, TokenStore};
use crate::worker::backoff::RetryDelayProvider;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Revert signals kept in flight before newer ones are dropped; a dropped
/// signal is re-raised on the next ingestion poll.
const REVERT_SIGNAL_BUFFER: usize = 16;

/// Everything the [`Runner`] needs from its host: validated configuration,
/// store and chain handles, the pre-registered counter service, and an
/// optional off-chain data source.
pub struct RunnerParams {
    pub config: IndexerConfig,
    /// Shared with services the host wires itself, such as the counter
    /// processors inside `counter_service`.
    pub telemetry: Arc<Telemetry>,
    pub chain: Arc<dyn ChainSource>,
    pub blocks: Arc<dyn BlockStore>,
    pub batches: Arc<dyn BatchStore>,
    pub balances: Arc<dyn BalanceStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub counter_service: CounterService,
    pub token_data_provider: Option<Arc<dyn TokenOffChainDataProvider>>,
}

/// Builds every indexing service from one configuration, coordinates their
/// lifecycle, and handles OS signals for graceful shutdowns.
pub struct Runner {
    config: IndexerConfig,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    block_service: BlockService,
    batch_service: BatchService,
    counter_service: CounterService,
    status_service: BlockStatusService,
    balances_cleaner: BalancesCleanerService,
    token_saver: Option<TokenDataSaverService>,
    revert_rx: Option<mpsc::Receiver<RevertSignal>>,
    reporter: Option<JoinHandle<()>>,
    started: bool,
}

impl Runner {
    pub fn new(params: RunnerParams) -> Self {
        let RunnerParams {
            config,
            telemetry,
            chain,
            blocks,
            batches,
            balances,
            tokens,
            counter_service,
            token_data_provider,
        } = params;

        let shutdown = CancellationToken::new();
        let (revert_tx, revert_rx) = mpsc::channel(REVERT_SIGNAL_BUFFER);
        let retry_delays = Arc::new(RetryDelayProvider::new(config.base_retry_delay()));

        let block_processor = BlockProcessor::new(
            Arc::clone(&chain),
            Arc::clone(&blocks),
            revert_tx,
            &config,
            Arc::clone(&telemetry),
        );
        let block_service = BlockService::new(
            block_processor,
            retry_delays,
            config.blocks_polling_interval(),
            Arc::clone(&telemetry),
        );
        let batch_service = BatchService::new(
            Arc::clone(&chain),
            batches,
            Arc::clone(&blocks),
            config.batches_polling_interval(),
            Arc::clone(&telemetry),
        );
        let status_service = BlockStatusService::new(
            Arc::clone(&chain),
            Arc::clone(&blocks),
            config.block_status_polling_interval(),
            Arc::clone(&telemetry),
        );
        let balances_cleaner = BalancesCleanerService::new(
            balances,
            blocks,
            config.balances_cleanup_interval(),
            Arc::clone(&telemetry),
        );
        let token_saver = token_data_provider.map(|provider| {
            TokenDataSaverService::new(
                tokens,
                provider,
                config.token_refresh_interval(),
                Arc::clone(&telemetry),
            )
        });

        Self {
            config,
            telemetry,
            shutdown,
            block_service,
            batch_service,
            counter_service,
            status_service,
            balances_cleaner,
            token_saver,
            revert_rx: Some(revert_rx),
            reporter: None,
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        Arc::clone(&self.telemetry)
    }

    /// Receiver carrying revert signals raised by block ingestion. The host's
    /// reorg handler consumes it; subsequent calls return `None`.
    pub fn take_revert_signals(&mut self) -> Option<mpsc::Receiver<RevertSignal>> {
        self.revert_rx.take()
    }

    /// Starts every enabled service. Block ingestion and status promotion
    /// always run; batch tracking, counters, and the balances cleaner honour
    /// their disable flags; the token saver runs only when a data provider
    /// was supplied.
    pub fn start(&mut self) {
        if self.started {
            return;
        }

        tracing::info!(
            batch_tracking_disabled = self.config.disable_batch_tracking(),
            counters_disabled = self.config.disable_counters(),
            balances_cleaner_disabled = self.config.disable_balances_cleaner(),
            token_saver_enabled = self.token_saver.is_some(),
            "starting indexer services"
        );

        self.reporter = Some(spawn_metrics_reporter(
            Arc::clone(&self.telemetry),
            self.shutdown.child_token(),
            self.config.metrics_interval(),
        ));

        self.block_service.start();
        self.status_service.start();
        if !self.config.disable_batch_tracking() {
            self.batch_service.start();
        }
        if !self.config.disable_counters() {
            self.counter_service.start();
        }
        if !self.config.disable_balances_cleaner() {
            self.balances_cleaner.start();
        }
        if let Some(saver) = self.token_saver.as_mut() {
            saver.start();
        }

        self.started = true;
    }

    /// Stops all services gracefully: cancels the root token, waits for every
    /// in-flight step to finish, then reaps the metrics reporter.
    pub async fn stop(&mut self) {
        if !self.started {
            return;
        }

        self.shutdown.cancel();
        self.block_service.stop().await;
        self.batch_service.stop().await;
        self.counter_service.stop().await;
        self.status_service.stop().await;
        self.balances_cleaner.stop().await;
        if let Some(saver) = self.token_saver.as_mut() {
            saver.stop().await;
        }
        if let Some(reporter) = self.reporter.take() {
            if let Err(error) = reporter.await {
                tracing::error!(%error, "metrics reporter terminated abnormally");
            }
        }

        self.started = false;
        self.reinitialize_shutdown_token();
        tracing::info!("indexer services stopped");
    }

    /// Rolls counter aggregates back past `last_correct_block` and purges
    /// rows that reached zero. Counter workers must not be running; the
    /// host's reorg handler calls this between [`Runner::stop`] and
    /// [`Runner::start`].
    pub async fn revert_counters(&self, last_correct_block: u64) -> Result<()> {
        self.counter_service.revert(last_correct_block).await
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start();
        tracing::info!("indexer started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down indexer");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("indexer shutdown token cancelled");
            }
        }

        self.stop().await;
        Ok(())
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
    }
}
