//! Periodic refresh of off-chain market data for bridged tokens.

use crate::runtime::telemetry::Telemetry;
use crate::storage::interfaces::TokenStore;
use crate::storage::types::TokenOffChainData;
use crate::worker::engine::{StepFuture, Worker, WorkerLoop};
use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of off-chain market data. Concrete fetchers live in the host; the
/// saver only depends on this trait.
pub trait TokenOffChainDataProvider: Send + Sync {
    /// Returns current market data for the given bridged L1 token addresses.
    fn token_offchain_data(
        &self,
        bridged_l1_addresses: Vec<String>,
    ) -> BoxFuture<'_, Result<Vec<TokenOffChainData>>>;
}

struct TokenSaverLoop {
    tokens: Arc<dyn TokenStore>,
    provider: Arc<dyn TokenOffChainDataProvider>,
    refresh_interval: Duration,
    telemetry: Arc<Telemetry>,
}

impl WorkerLoop for TokenSaverLoop {
    fn run_step(&self) -> StepFuture<'_> {
        Box::pin(async move {
            match self.refresh_when_due().await {
                Ok(idle) => idle,
                Err(error) => {
                    self.telemetry.record_worker_error();
                    let error_chain = format!("{error:#}");
                    tracing::error!(error = %error_chain, "failed to refresh token off-chain data");
                    self.refresh_interval
                }
            }
        })
    }
}

impl TokenSaverLoop {
    /// Refreshes all bridged tokens once the configured interval has elapsed
    /// since the last stored refresh; otherwise reports the remaining time.
    /// Data that has never been stored is due immediately.
    async fn refresh_when_due(&self) -> Result<Duration> {
        let last_updated_at = self.tokens.offchain_data_last_updated_at().await?;
        let now = unix_millis_now();
        let elapsed_ms = last_updated_at.map_or(u64::MAX, |at| now.saturating_sub(at));
        let interval_ms = self.refresh_interval.as_millis() as u64;
        if elapsed_ms < interval_ms {
            return Ok(Duration::from_millis(interval_ms - elapsed_ms));
        }

        let bridged = self.tokens.bridged_tokens().await?;
        let updates = self.provider.token_offchain_data(bridged).await?;
        // One timestamp for the whole pass keeps the next due time stable.
        self.tokens
            .update_tokens_offchain_data(&updates, now)
            .await?;
        tracing::info!(
            tokens_updated = updates.len(),
            "refreshed token off-chain data"
        );
        Ok(self.refresh_interval)
    }
}

fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

/// Polling service keeping bridged-token market data fresh.
pub struct TokenDataSaverService {
    worker: Worker,
}

impl TokenDataSaverService {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        provider: Arc<dyn TokenOffChainDataProvider>,
        refresh_interval: Duration,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let task = TokenSaverLoop {
            tokens,
            provider,
            refresh_interval,
            telemetry,
        };
        Self {
            worker: Worker::new("token-offchain-saver", Arc::new(task)),
        }
    }

    pub fn start(&mut self) {
        self.worker.start();
    }

    pub async fn stop(&mut self) {
        self.worker.stop().await;
    }
}
