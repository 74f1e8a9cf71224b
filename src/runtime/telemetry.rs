use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    blocks_ingested: AtomicU64,
    batches_sealed: AtomicU64,
    counter_batches: AtomicU64,
    counter_records: AtomicU64,
    reverts_signaled: AtomicU64,
    balance_cleanups: AtomicU64,
    worker_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_blocks_ingested(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.blocks_ingested.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_batch_sealed(&self) {
        self.batches_sealed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one processed counter batch together with how many records it
    /// covered.
    pub fn record_counter_batch(&self, records: u64) {
        self.counter_batches.fetch_add(1, Ordering::Relaxed);
        self.counter_records.fetch_add(records, Ordering::Relaxed);
    }

    /// Records a detected divergence between the stored chain and the node.
    pub fn record_revert_signal(&self) {
        self.reverts_signaled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_balance_cleanup(&self) {
        self.balance_cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_error(&self) {
        self.worker_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            blocks_ingested: self.blocks_ingested.load(Ordering::Relaxed),
            batches_sealed: self.batches_sealed.load(Ordering::Relaxed),
            counter_batches: self.counter_batches.load(Ordering::Relaxed),
            counter_records: self.counter_records.load(Ordering::Relaxed),
            reverts_signaled: self.reverts_signaled.load(Ordering::Relaxed),
            balance_cleanups: self.balance_cleanups.load(Ordering::Relaxed),
            worker_errors: self.worker_errors.load(Ordering::Relaxed),
        }
    }

    pub fn blocks_ingested(&self) -> u64 {
        self.blocks_ingested.load(Ordering::Relaxed)
    }

    pub fn batches_sealed(&self) -> u64 {
        self.batches_sealed.load(Ordering::Relaxed)
    }

    pub fn counter_batches(&self) -> u64 {
        self.counter_batches.load(Ordering::Relaxed)
    }

    pub fn counter_records(&self) -> u64 {
        self.counter_records.load(Ordering::Relaxed)
    }

    pub fn reverts_signaled(&self) -> u64 {
        self.reverts_signaled.load(Ordering::Relaxed)
    }

    pub fn balance_cleanups(&self) -> u64 {
        self.balance_cleanups.load(Ordering::Relaxed)
    }

    pub fn worker_errors(&self) -> u64 {
        self.worker_errors.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub blocks_ingested: u64,
    pub batches_sealed: u64,
    pub counter_batches: u64,
    pub counter_records: u64,
    pub reverts_signaled: u64,
    pub balance_cleanups: u64,
    pub worker_errors: u64,
}

/// Spawns a background task that periodically logs ingestion and aggregation
/// progress along with error counts.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "blocktally::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let records_delta = current_snapshot
                        .counter_records
                        .saturating_sub(last_snapshot.counter_records);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let records_per_sec = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        records_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "blocktally::metrics",
                        blocks_ingested = current_snapshot.blocks_ingested,
                        batches_sealed = current_snapshot.batches_sealed,
                        counter_batches = current_snapshot.counter_batches,
                        counter_records = current_snapshot.counter_records,
                        records_per_sec = format!("{records_per_sec:.2}"),
                        reverts_signaled = current_snapshot.reverts_signaled,
                        balance_cleanups = current_snapshot.balance_cleanups,
                        worker_errors = current_snapshot.worker_errors,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
