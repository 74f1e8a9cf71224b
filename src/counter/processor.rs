//! Per-table counter maintenance: resumable forward batches over new records
//! and a revert path that walks the same records backwards after a reorg.

use crate::counter::aggregation::{calculate_counters, CounterCriteria};
use crate::runtime::telemetry::Telemetry;
use crate::storage::interfaces::{CounterStore, RecordStore};
use crate::storage::types::{Countable, RecordQuery};
use anyhow::{bail, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Maintains the materialized counters of one countable table.
///
/// Forward progress is tracked by a durable cursor advanced atomically with
/// each applied batch; an in-memory copy of the cursor avoids re-reading it on
/// every poll and is dropped whenever a batch fails, so the next attempt
/// resumes from durable state. Reverting never touches the cursor: records
/// re-inserted after a reorg get fresh, higher sequence numbers, so the
/// forward path simply keeps going.
pub struct CounterProcessor<R: Countable> {
    records: Arc<dyn RecordStore<R>>,
    counters: Arc<dyn CounterStore>,
    criteria_list: Vec<CounterCriteria>,
    records_batch_size: usize,
    fields_to_select: Arc<[String]>,
    telemetry: Arc<Telemetry>,
    /// Next record number to fetch; `None` means unknown, re-read the durable
    /// cursor first.
    next_record_number: Mutex<Option<u64>>,
}

impl<R: Countable> CounterProcessor<R> {
    pub fn new(
        records: Arc<dyn RecordStore<R>>,
        counters: Arc<dyn CounterStore>,
        criteria_list: Vec<CounterCriteria>,
        records_batch_size: usize,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        if records_batch_size == 0 {
            bail!("records_batch_size must be greater than zero");
        }
        validate_criteria_list(&criteria_list)?;

        let fields_to_select = fields_to_select(&criteria_list);
        Ok(Self {
            records,
            counters,
            criteria_list,
            records_batch_size,
            fields_to_select,
            telemetry,
            next_record_number: Mutex::new(None),
        })
    }

    /// Processes the next batch of unseen records into counter increments.
    ///
    /// Returns `true` when a full batch was applied, meaning more records are
    /// likely already waiting. Failures are contained here: they are logged,
    /// the cached cursor is dropped, and `false` is returned so the caller
    /// just polls again later.
    pub async fn process_next_records_batch(&self) -> bool {
        match self.try_process_next_batch().await {
            Ok(full_batch) => full_batch,
            Err(error) => {
                self.telemetry.record_worker_error();
                let error_chain = format!("{error:#}");
                tracing::error!(
                    table = R::TABLE,
                    starting_from_number = ?self.cached_next_number(),
                    error = %error_chain,
                    "failed to process next records batch for counters"
                );
                self.set_cached_next_number(None);
                false
            }
        }
    }

    async fn try_process_next_batch(&self) -> Result<bool> {
        let from_number = match self.cached_next_number() {
            Some(number) => number,
            None => {
                let durable = self.counters.last_processed_record_number(R::TABLE).await?;
                let next = durable.map_or(0, |last| last + 1);
                self.set_cached_next_number(Some(next));
                next
            }
        };

        let records = self
            .records
            .find(RecordQuery {
                from_number,
                to_number: None,
                above_block: None,
                select: Arc::clone(&self.fields_to_select),
                take: self.records_batch_size,
            })
            .await?;

        let Some(last_record) = records.last() else {
            tracing::debug!(
                table = R::TABLE,
                from_number,
                "no new records to count yet"
            );
            return Ok(false);
        };
        let new_cursor = last_record.number();

        let deltas = calculate_counters(&records, &self.criteria_list);
        self.counters
            .increment_counters(R::TABLE, deltas, new_cursor)
            .await?;
        self.set_cached_next_number(Some(new_cursor + 1));
        self.telemetry.record_counter_batch(records.len() as u64);
        tracing::debug!(
            table = R::TABLE,
            from_number,
            records = records.len(),
            new_cursor,
            "applied counter increments"
        );

        Ok(records.len() == self.records_batch_size)
    }

    /// Walks already-counted records above `last_correct_block` and takes
    /// their contributions back out, in batches.
    ///
    /// The window is fixed up front from the durable cursor; records the
    /// forward path picks up concurrently sit past it and are not touched.
    /// Unlike the forward path, failures here must stop the caller's rollback,
    /// so they propagate.
    pub async fn revert(&self, last_correct_block: u64) -> Result<()> {
        let Some(last_processed) = self.counters.last_processed_record_number(R::TABLE).await?
        else {
            return Ok(());
        };

        let mut from_number = 0u64;
        loop {
            if from_number > last_processed {
                return Ok(());
            }

            let records = self
                .records
                .find(RecordQuery {
                    from_number,
                    to_number: Some(last_processed),
                    above_block: Some(last_correct_block),
                    select: Arc::clone(&self.fields_to_select),
                    take: self.records_batch_size,
                })
                .await?;

            let Some(last_record) = records.last() else {
                return Ok(());
            };
            tracing::debug!(
                table = R::TABLE,
                last_correct_block,
                starting_from_number = records[0].number(),
                records = records.len(),
                "reverting counter increments"
            );
            let next_from = last_record.number() + 1;

            let deltas = calculate_counters(&records, &self.criteria_list);
            self.counters.decrement_counters(deltas).await?;

            if records.len() < self.records_batch_size {
                return Ok(());
            }
            from_number = next_from;
        }
    }

    fn cached_next_number(&self) -> Option<u64> {
        *self
            .next_record_number
            .lock()
            .expect("counter cursor lock poisoned")
    }

    fn set_cached_next_number(&self, value: Option<u64>) {
        *self
            .next_record_number
            .lock()
            .expect("counter cursor lock poisoned") = value;
    }
}

impl<R: Countable> fmt::Debug for CounterProcessor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterProcessor")
            .field("table", &R::TABLE)
            .field("criteria_list", &self.criteria_list)
            .field("records_batch_size", &self.records_batch_size)
            .field("fields_to_select", &self.fields_to_select)
            .field("next_record_number", &self.next_record_number)
            .finish_non_exhaustive()
    }
}

fn validate_criteria_list(criteria_list: &[CounterCriteria]) -> Result<()> {
    for criteria in criteria_list {
        let mut seen = HashSet::new();
        for selector in criteria {
            if selector.is_empty() {
                bail!("counter criteria contain an empty field selector");
            }
            if selector.split('|').any(str::is_empty) {
                bail!("field selector {selector:?} contains an empty alternative");
            }
            if !seen.insert(selector.as_str()) {
                bail!("field selector {selector:?} appears twice in one criterion");
            }
        }
    }
    Ok(())
}

/// Fields the record queries need: every name referenced by any selector, in
/// first-appearance order, plus the sequence number.
fn fields_to_select(criteria_list: &[CounterCriteria]) -> Arc<[String]> {
    let mut fields: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for criteria in criteria_list {
        for selector in criteria {
            for field in selector.split('|') {
                if seen.insert(field) {
                    fields.push(field.to_owned());
                }
            }
        }
    }
    fields.push("number".to_owned());
    fields.into()
}
