use std::num::NonZeroUsize;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use super::{FailedBatch, FatalError, StoreAborted, WriteOutcome};
use crate::metrics;
use crate::model::TypedRecord;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Why a single batch did not commit.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The batch was rolled back; later batches may still succeed.
    #[error("batch rejected: {reason}")]
    Rejected { reason: String },
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Writes one batch inside one transaction: all of it lands or none of it does.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn write_batch(&self, batch: &[TypedRecord]) -> Result<(), BatchError>;
}

/// Splits records into consecutive batches and drives them through a sink,
/// at most `workers` transactions at a time.
#[derive(Debug, Clone, Copy)]
pub struct BatchWriter {
    batch_size: NonZeroUsize,
    workers: NonZeroUsize,
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            workers: NonZeroUsize::MIN,
        }
    }
}

impl BatchWriter {
    pub fn new(batch_size: NonZeroUsize, workers: NonZeroUsize) -> Self {
        Self { batch_size, workers }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn workers(&self) -> usize {
        self.workers.get()
    }

    pub async fn write<S>(&self, sink: &S, records: &[TypedRecord]) -> Result<WriteOutcome, StoreAborted>
    where
        S: BatchSink + ?Sized,
    {
        let mut outcome = WriteOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let pending: Vec<_> = records
            .chunks(self.batch_size.get())
            .enumerate()
            .map(|(number, batch)| timed(sink, number, batch))
            .collect();
        let mut results = stream::iter(pending).buffer_unordered(self.workers.get());

        while let Some((number, batch, result)) = results.next().await {
            match result {
                Ok(()) => {
                    tracing::debug!(batch = number, records = batch.len(), "batch committed");
                    metrics::inc_batch("committed");
                    outcome.record_success(batch.len());
                }
                Err(BatchError::Rejected { reason }) => {
                    tracing::warn!(batch = number, records = batch.len(), %reason, "batch rolled back");
                    metrics::inc_batch("rolled_back");
                    outcome.record_failure(FailedBatch {
                        batch: number,
                        records: batch.iter().map(TypedRecord::index).collect(),
                        reason,
                    });
                }
                Err(BatchError::Fatal(source)) => {
                    tracing::error!(batch = number, error = %source, "aborting store");
                    metrics::inc_batch("aborted");
                    return Err(StoreAborted { partial: outcome, source });
                }
            }
        }

        outcome.failed_batches.sort_by_key(|b| b.batch);
        Ok(outcome)
    }
}

async fn timed<'a, S>(
    sink: &'a S,
    number: usize,
    batch: &'a [TypedRecord],
) -> (usize, &'a [TypedRecord], Result<(), BatchError>)
where
    S: BatchSink + ?Sized,
{
    let timer = std::time::Instant::now();
    let result = sink.write_batch(batch).await;
    metrics::observe_batch_duration(timer.elapsed().as_secs_f64());
    (number, batch, result)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::TypedValue;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Upserts into a map keyed by the first value; fails batches touching poisoned ids.
    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub rows: Mutex<BTreeMap<i64, Vec<TypedValue>>>,
        pub poisoned: HashSet<i64>,
        pub fatal_on_batch: Option<usize>,
        pub calls: AtomicUsize,
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
        pub delay: Option<Duration>,
    }

    fn key(record: &TypedRecord) -> i64 {
        match record.get(0) {
            Some(TypedValue::Integer(id)) => *id,
            _ => -1,
        }
    }

    #[async_trait]
    impl BatchSink for MemorySink {
        async fn write_batch(&self, batch: &[TypedRecord]) -> Result<(), BatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fatal_on_batch == Some(call) {
                return Err(FatalError::Connection("connection reset".into()).into());
            }
            if let Some(bad) = batch.iter().map(key).find(|id| self.poisoned.contains(id)) {
                return Err(BatchError::Rejected { reason: format!("constraint violation for id {bad}") });
            }
            let mut rows = self.rows.lock().unwrap();
            for record in batch {
                rows.insert(key(record), record.values().to_vec());
            }
            Ok(())
        }
    }

    pub(crate) fn records(ids: impl IntoIterator<Item = i64>) -> Vec<TypedRecord> {
        ids.into_iter()
            .enumerate()
            .map(|(i, id)| TypedRecord::new(i, vec![TypedValue::Integer(id), TypedValue::Text(format!("r{id}"))]))
            .collect()
    }

    fn writer(batch_size: usize, workers: usize) -> BatchWriter {
        BatchWriter::new(NonZeroUsize::new(batch_size).unwrap(), NonZeroUsize::new(workers).unwrap())
    }

    #[tokio::test]
    async fn every_record_is_counted_once() {
        let sink = MemorySink { poisoned: HashSet::from([7]), ..Default::default() };
        let outcome = writer(4, 1).write(&sink, &records(0..10)).await.unwrap();

        assert_eq!(outcome.total(), 10);
        assert_eq!(outcome.success, 6);
        assert_eq!(outcome.failed, 4);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn one_bad_record_fails_its_whole_batch() {
        let sink = MemorySink { poisoned: HashSet::from([2]), ..Default::default() };
        let outcome = writer(3, 1).write(&sink, &records([1, 2, 3])).await.unwrap();

        assert_eq!(outcome.success, 0);
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.failed_batches.len(), 1);
        assert_eq!(outcome.failed_batches[0].records, vec![0, 1, 2]);
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn final_short_batch_is_flushed() {
        let sink = MemorySink::default();
        let outcome = writer(1000, 1).write(&sink, &records(0..2500)).await.unwrap();

        assert_eq!(outcome.success, 2500);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.rows.lock().unwrap().len(), 2500);
    }

    #[tokio::test]
    async fn empty_input_touches_nothing() {
        let sink = MemorySink::default();
        let outcome = writer(10, 2).write(&sink, &[]).await.unwrap();
        assert_eq!(outcome, WriteOutcome::default());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fatal_error_keeps_partial_counts() {
        let sink = MemorySink { fatal_on_batch: Some(2), ..Default::default() };
        let err = writer(2, 1).write(&sink, &records(0..10)).await.unwrap_err();

        assert_eq!(err.partial.success, 4);
        assert_eq!(err.partial.failed, 0);
        assert!(matches!(err.source, FatalError::Connection(_)));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn concurrent_workers_share_the_load() {
        let sink = MemorySink {
            delay: Some(Duration::from_millis(20)),
            poisoned: HashSet::from([15]),
            ..Default::default()
        };
        let outcome = writer(5, 4).write(&sink, &records(0..40)).await.unwrap();

        assert_eq!(outcome.total(), 40);
        assert_eq!(outcome.failed, 5);
        assert_eq!(outcome.failed_batches[0].batch, 3);
        let peak = sink.peak.load(Ordering::SeqCst);
        assert!(peak > 1 && peak <= 4, "peak concurrency {peak}");
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn write_future_can_cross_threads() {
        let sink = MemorySink::default();
        let input = records(0..3);
        let w = writer(2, 2);
        let fut = w.write(&sink, &input);
        assert_send(&fut);

        let dyn_sink: &dyn BatchSink = &sink;
        assert_send(&w.write(dyn_sink, &input));
    }

    #[tokio::test]
    async fn write_runs_on_a_spawned_task() {
        let sink = std::sync::Arc::new(MemorySink::default());
        let task_sink = std::sync::Arc::clone(&sink);
        let outcome = tokio::spawn(async move {
            let input = records(0..7);
            writer(3, 2).write(task_sink.as_ref(), &input).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome.success, 7);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rewriting_the_same_records_is_idempotent() {
        let sink = MemorySink::default();
        let input = records(0..25);
        let w = writer(10, 2);

        w.write(&sink, &input).await.unwrap();
        let first = sink.rows.lock().unwrap().clone();
        let again = w.write(&sink, &input).await.unwrap();

        assert_eq!(again.success, 25);
        assert_eq!(*sink.rows.lock().unwrap(), first);
    }
}
