mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use blocktally::storage::memory::{MemoryRecords, MemoryStorage};
use blocktally::{
    CounterDelta, CounterProcessor, CounterService, CounterStore, CounterWorker, RecordQuery,
    RecordStore, Telemetry,
};
use futures::future::BoxFuture;
use support::{init_tracing, transaction, transfer, wait_for_cursor, Transaction};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forward_batch_builds_expected_buckets() {
    init_tracing();

    let records = Arc::new(MemoryRecords::new());
    records.extend([transaction(0, 10, "a", "b"), transaction(1, 10, "c", "a")]);
    let storage = Arc::new(MemoryStorage::new());
    let telemetry = Arc::new(Telemetry::default());

    let processor = CounterProcessor::new(
        records,
        storage.clone(),
        vec![vec!["blockNumber".to_owned(), "from|to".to_owned()]],
        100,
        telemetry.clone(),
    )
    .unwrap();

    // Two records fit in one partial batch, so no follow-up work is signaled.
    assert!(!processor.process_next_records_batch().await);

    assert_eq!(storage.counter_value("transactions", ""), Some(2));
    assert_eq!(
        storage.counter_value("transactions", "blockNumber=10&from%7Cto=a"),
        Some(2)
    );
    assert_eq!(
        storage.counter_value("transactions", "blockNumber=10&from%7Cto=b"),
        Some(1)
    );
    assert_eq!(
        storage.counter_value("transactions", "blockNumber=10&from%7Cto=c"),
        Some(1)
    );
    assert_eq!(storage.cursor("transactions"), Some(1));
    assert_eq!(telemetry.counter_records(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_batches_signal_more_work() {
    init_tracing();

    let records = Arc::new(MemoryRecords::new());
    records.extend((0..5).map(|i| transaction(i, 10 + i, "a", "b")));
    let storage = Arc::new(MemoryStorage::new());

    let processor = CounterProcessor::new(
        records,
        storage.clone(),
        vec![vec!["from".to_owned()]],
        2,
        Arc::new(Telemetry::default()),
    )
    .unwrap();

    assert!(processor.process_next_records_batch().await);
    assert!(processor.process_next_records_batch().await);
    assert!(!processor.process_next_records_batch().await);
    assert!(!processor.process_next_records_batch().await);

    assert_eq!(storage.counter_value("transactions", ""), Some(5));
    assert_eq!(storage.counter_value("transactions", "from=a"), Some(5));
    assert_eq!(storage.cursor("transactions"), Some(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn restart_resumes_from_the_durable_cursor() {
    init_tracing();

    let records = Arc::new(MemoryRecords::new());
    records.extend([
        transaction(0, 10, "a", "b"),
        transaction(1, 11, "a", "b"),
        transaction(2, 12, "a", "b"),
    ]);
    let storage = Arc::new(MemoryStorage::new());

    let first = CounterProcessor::new(
        records.clone(),
        storage.clone(),
        vec![vec!["from".to_owned()]],
        2,
        Arc::new(Telemetry::default()),
    )
    .unwrap();
    assert!(first.process_next_records_batch().await);
    assert_eq!(storage.cursor("transactions"), Some(1));
    drop(first);

    let second = CounterProcessor::new(
        records,
        storage.clone(),
        vec![vec!["from".to_owned()]],
        2,
        Arc::new(Telemetry::default()),
    )
    .unwrap();
    assert!(!second.process_next_records_batch().await);
    assert!(!second.process_next_records_batch().await);

    // Record 2 was counted exactly once after the restart.
    assert_eq!(storage.counter_value("transactions", ""), Some(3));
    assert_eq!(storage.cursor("transactions"), Some(2));
}

struct FlakyCounters {
    inner: Arc<MemoryStorage>,
    failures_left: AtomicUsize,
}

impl FlakyCounters {
    fn new(inner: Arc<MemoryStorage>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

impl CounterStore for FlakyCounters {
    fn last_processed_record_number<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<u64>>> {
        self.inner.last_processed_record_number(table)
    }

    fn increment_counters<'a>(
        &'a self,
        table: &'a str,
        deltas: Vec<CounterDelta>,
        new_cursor: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                bail!("scripted counter-store failure");
            }
            self.inner
                .increment_counters(table, deltas, new_cursor)
                .await
        })
    }

    fn decrement_counters(&self, deltas: Vec<CounterDelta>) -> BoxFuture<'_, Result<()>> {
        self.inner.decrement_counters(deltas)
    }

    fn delete_zero_counters(&self) -> BoxFuture<'_, Result<()>> {
        self.inner.delete_zero_counters()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_recovers_from_a_failed_batch_without_double_counting() -> Result<()> {
    init_tracing();

    let records = Arc::new(MemoryRecords::new());
    records.extend((0..4).map(|i| transaction(i, i + 1, "a", "b")));
    let storage = Arc::new(MemoryStorage::new());
    let flaky = Arc::new(FlakyCounters::new(storage.clone(), 1));
    let telemetry = Arc::new(Telemetry::default());

    let processor = CounterProcessor::new(
        records,
        flaky,
        vec![vec!["from".to_owned()]],
        2,
        telemetry.clone(),
    )
    .unwrap();

    let mut worker = CounterWorker::new(processor, Duration::from_millis(20));
    worker.start();
    wait_for_cursor(&storage, "transactions", 3, Duration::from_secs(5)).await?;
    worker.stop().await;

    assert_eq!(storage.counter_value("transactions", ""), Some(4));
    assert_eq!(storage.counter_value("transactions", "from=a"), Some(4));
    assert_eq!(telemetry.worker_errors(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_reverts_all_tables_and_purges_zero_rows() {
    init_tracing();

    let tx_records = Arc::new(MemoryRecords::new());
    tx_records.extend([transaction(0, 10, "a", "b"), transaction(1, 20, "a", "c")]);
    let transfer_records = Arc::new(MemoryRecords::new());
    transfer_records.push(transfer(0, 20, Some("0xtok")));

    let storage = Arc::new(MemoryStorage::new());
    let telemetry = Arc::new(Telemetry::default());

    let tx_processor = CounterProcessor::new(
        tx_records,
        storage.clone(),
        vec![vec!["from|to".to_owned()]],
        50,
        telemetry.clone(),
    )
    .unwrap();
    let transfer_processor = CounterProcessor::new(
        transfer_records,
        storage.clone(),
        vec![vec!["tokenAddress".to_owned()]],
        50,
        telemetry.clone(),
    )
    .unwrap();

    tx_processor.process_next_records_batch().await;
    transfer_processor.process_next_records_batch().await;
    assert_eq!(storage.counter_value("transactions", "from%7Cto=a"), Some(2));
    assert_eq!(
        storage.counter_value("transfers", "tokenAddress=0xtok"),
        Some(1)
    );

    let mut service = CounterService::new(storage.clone());
    service.register(CounterWorker::new(tx_processor, Duration::from_millis(25)));
    service.register(CounterWorker::new(
        transfer_processor,
        Duration::from_millis(25),
    ));
    assert_eq!(service.worker_count(), 2);

    // Records above the rollback point must still be readable while their
    // contributions are taken back out; the reorg handler deletes them after.
    service.revert(10).await.unwrap();

    assert_eq!(
        storage.counters_for("transactions"),
        vec![
            (String::new(), 1),
            ("from%7Cto=a".to_owned(), 1),
            ("from%7Cto=b".to_owned(), 1),
        ]
    );
    assert!(storage.counters_for("transfers").is_empty());
    assert_eq!(storage.cursor("transactions"), Some(1));
    assert_eq!(storage.cursor("transfers"), Some(0));
}

struct CountingRecords {
    inner: Arc<MemoryRecords<Transaction>>,
    finds: AtomicUsize,
}

impl RecordStore<Transaction> for CountingRecords {
    fn find(&self, query: RecordQuery) -> BoxFuture<'_, Result<Vec<Transaction>>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(query)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revert_pages_cleanly_at_an_exact_batch_multiple() {
    init_tracing();

    let records = Arc::new(MemoryRecords::new());
    records.extend((0..4).map(|i| transaction(i, 6 + i, "a", "b")));
    let storage = Arc::new(MemoryStorage::new());

    let forward = CounterProcessor::new(
        records.clone(),
        storage.clone(),
        vec![vec!["from".to_owned()]],
        10,
        Arc::new(Telemetry::default()),
    )
    .unwrap();
    assert!(!forward.process_next_records_batch().await);
    assert_eq!(storage.counter_value("transactions", ""), Some(4));

    let counting = Arc::new(CountingRecords {
        inner: records,
        finds: AtomicUsize::new(0),
    });
    let reverting = CounterProcessor::new(
        counting.clone(),
        storage.clone(),
        vec![vec!["from".to_owned()]],
        2,
        Arc::new(Telemetry::default()),
    )
    .unwrap();

    // All four records sit above the rollback block and split into exactly
    // two full pages; the walk must stop there instead of fetching a third,
    // empty page.
    reverting.revert(5).await.unwrap();

    assert_eq!(counting.finds.load(Ordering::SeqCst), 2);
    assert_eq!(storage.counter_value("transactions", ""), Some(0));
    assert_eq!(storage.counter_value("transactions", "from=a"), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_drains_backlog_and_stops_polling_after_stop() -> Result<()> {
    init_tracing();

    let records = Arc::new(MemoryRecords::new());
    records.extend((0..25).map(|i| transaction(i, i / 5, "a", "b")));
    let storage = Arc::new(MemoryStorage::new());

    let processor = CounterProcessor::new(
        records.clone(),
        storage.clone(),
        vec![vec!["from".to_owned()]],
        10,
        Arc::new(Telemetry::default()),
    )
    .unwrap();

    let mut worker = CounterWorker::new(processor, Duration::from_millis(20));
    worker.start();
    wait_for_cursor(&storage, "transactions", 24, Duration::from_secs(5)).await?;
    worker.stop().await;
    assert_eq!(storage.counter_value("transactions", ""), Some(25));

    records.push(transaction(25, 99, "x", "y"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(storage.cursor("transactions"), Some(24));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_runs_registered_workers_until_stopped() -> Result<()> {
    init_tracing();

    let tx_records = Arc::new(MemoryRecords::new());
    tx_records.extend((0..3).map(|i| transaction(i, 10 + i, "a", "b")));
    let transfer_records = Arc::new(MemoryRecords::new());
    transfer_records.extend([transfer(0, 10, Some("0xtok")), transfer(1, 11, None)]);

    let storage = Arc::new(MemoryStorage::new());
    let telemetry = Arc::new(Telemetry::default());

    let mut service = CounterService::new(storage.clone());
    service.register(CounterWorker::new(
        CounterProcessor::new(
            tx_records,
            storage.clone(),
            vec![vec!["from".to_owned()]],
            10,
            telemetry.clone(),
        )
        .unwrap(),
        Duration::from_millis(25),
    ));
    service.register(CounterWorker::new(
        CounterProcessor::new(
            transfer_records,
            storage.clone(),
            vec![vec!["tokenAddress".to_owned()]],
            10,
            telemetry.clone(),
        )
        .unwrap(),
        Duration::from_millis(25),
    ));

    service.start();
    wait_for_cursor(&storage, "transactions", 2, Duration::from_secs(5)).await?;
    wait_for_cursor(&storage, "transfers", 1, Duration::from_secs(5)).await?;
    service.stop().await;

    assert_eq!(storage.counter_value("transactions", ""), Some(3));
    assert_eq!(storage.counter_value("transfers", ""), Some(2));
    assert_eq!(
        storage.counter_value("transfers", "tokenAddress=0xtok"),
        Some(1)
    );
    assert_eq!(
        storage.counter_value("transfers", "tokenAddress=null"),
        Some(1)
    );
    Ok(())
}
