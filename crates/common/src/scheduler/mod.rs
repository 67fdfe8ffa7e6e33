//! Bounded fan-out of work over a worker pool
//!
//! Items are partitioned into batches and dispatched onto tokio tasks, with a
//! semaphore capping how many are in flight. Results always come back in
//! input order, one per item, whatever order the workers finish in.

use crate::errors::BatchFailure;
use crate::metrics::{record_batch_dispatched, record_batch_items};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Cooperative cancellation flag shared between a caller and a running job
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Partitions work and runs it with at most `max_workers` units in flight
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    stage: &'static str,
    batch_size: usize,
    max_workers: usize,
}

impl BatchScheduler {
    /// Zero sizes are raised to 1
    pub fn new(stage: &'static str, batch_size: usize, max_workers: usize) -> Self {
        Self {
            stage,
            batch_size: batch_size.max(1),
            max_workers: max_workers.max(1),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Contiguous batches of at most `size` items; the last may be smaller
    pub fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
        let size = size.max(1);
        let mut batches = Vec::with_capacity(items.len().div_ceil(size));
        let mut current = Vec::with_capacity(size);
        for item in items {
            current.push(item);
            if current.len() == size {
                batches.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    /// Run `op` once per batch of `batch_size` items.
    ///
    /// `op` must return one result per input item, in order. A batch whose
    /// result count differs fails every item with `LengthMismatch`; a
    /// panicking batch fails its items with `Panicked`. Batches never
    /// dispatched because of cancellation report `Cancelled`.
    pub async fn run_batched<T, U, E, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        op: F,
    ) -> Vec<Result<U, E>>
    where
        T: Send + 'static,
        U: Send + 'static,
        E: From<BatchFailure> + Send + 'static,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Vec<Result<U, E>>> + Send + 'static,
    {
        self.dispatch(items, self.batch_size, cancel, op).await
    }

    /// Run `op` once per item, at most `max_workers` at a time
    pub async fn run_each<T, U, E, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        op: F,
    ) -> Vec<Result<U, E>>
    where
        T: Send + 'static,
        U: Send + 'static,
        E: From<BatchFailure> + Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        self.dispatch(items, 1, cancel, |batch| {
            futures::future::join_all(batch.into_iter().map(&op))
        })
        .await
    }

    async fn dispatch<T, U, E, F, Fut>(
        &self,
        items: Vec<T>,
        batch_size: usize,
        cancel: &CancellationToken,
        op: F,
    ) -> Vec<Result<U, E>>
    where
        T: Send + 'static,
        U: Send + 'static,
        E: From<BatchFailure> + Send + 'static,
        F: Fn(Vec<T>) -> Fut,
        Fut: Future<Output = Vec<Result<U, E>>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let batches = Self::partition(items, batch_size);
        let batch_count = batches.len();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(batch_count);
        let mut offset = 0;

        debug!(
            stage = self.stage,
            items = total,
            batches = batch_count,
            max_workers = self.max_workers,
            "Dispatching work"
        );

        for batch in batches {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if cancel.is_cancelled() {
                info!(stage = self.stage, dispatched = handles.len(), "Cancelled before dispatch");
                break;
            }

            let len = batch.len();
            let work = op(batch);
            record_batch_dispatched(self.stage);
            handles.push((
                offset,
                len,
                tokio::spawn(async move {
                    let _permit = permit;
                    work.await
                }),
            ));
            offset += len;
        }

        let mut slots: Vec<Option<Result<U, E>>> = (0..total).map(|_| None).collect();

        for (start, len, handle) in handles {
            match handle.await {
                Ok(results) if results.len() == len => {
                    for (slot, result) in slots[start..start + len].iter_mut().zip(results) {
                        *slot = Some(result);
                    }
                }
                Ok(results) => {
                    error!(
                        stage = self.stage,
                        expected = len,
                        got = results.len(),
                        "Batch returned wrong number of results"
                    );
                    let got = results.len();
                    for slot in &mut slots[start..start + len] {
                        *slot = Some(Err(BatchFailure::LengthMismatch { expected: len, got }.into()));
                    }
                }
                Err(join_error) => {
                    error!(stage = self.stage, error = %join_error, "Batch worker failed");
                    let message = join_error.to_string();
                    for slot in &mut slots[start..start + len] {
                        *slot = Some(Err(BatchFailure::Panicked {
                            message: message.clone(),
                        }
                        .into()));
                    }
                }
            }
        }

        let results: Vec<Result<U, E>> = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(BatchFailure::Cancelled.into())))
            .collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        record_batch_items(self.stage, succeeded, total - succeeded);

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Item(String),
        Batch(BatchFailure),
    }

    impl From<BatchFailure> for TestError {
        fn from(failure: BatchFailure) -> Self {
            TestError::Batch(failure)
        }
    }

    fn ok_all(batch: Vec<u32>) -> Vec<Result<u32, TestError>> {
        batch.into_iter().map(|i| Ok(i * 10)).collect()
    }

    #[test]
    fn test_partition_sizes() {
        let batches = BatchScheduler::partition((0..7).collect::<Vec<_>>(), 3);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches[2], vec![6]);
    }

    #[test]
    fn test_zero_sizes_raised() {
        let scheduler = BatchScheduler::new("test", 0, 0);
        assert_eq!(scheduler.batch_size(), 1);
        assert_eq!(scheduler.max_workers(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_dispatches_nothing() {
        let scheduler = BatchScheduler::new("test", 4, 2);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let results = scheduler
            .run_batched(Vec::<u32>::new(), &CancellationToken::new(), move |batch| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { ok_all(batch) }
            })
            .await;

        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_seven_items_three_batches() {
        let scheduler = BatchScheduler::new("test", 3, 2);
        let sizes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = sizes.clone();

        let results = scheduler
            .run_batched((0..7).collect(), &CancellationToken::new(), move |batch| {
                seen.lock().unwrap().push(batch.len());
                async move { ok_all(batch) }
            })
            .await;

        let mut sizes = sizes.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 3, 3]);
        assert_eq!(
            results,
            (0..7).map(|i| Ok(i * 10)).collect::<Vec<Result<u32, TestError>>>()
        );
    }

    #[tokio::test]
    async fn test_order_preserved_under_random_latency() {
        let scheduler = BatchScheduler::new("test", 2, 8);
        let delays: Vec<u64> = {
            let mut rng = rand::thread_rng();
            (0..40).map(|_| rng.gen_range(0..15)).collect()
        };
        let delays = Arc::new(delays);

        let results = scheduler
            .run_batched((0..40u32).collect(), &CancellationToken::new(), move |batch| {
                let delay = delays[batch[0] as usize];
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    ok_all(batch)
                }
            })
            .await;

        let values: Vec<u32> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, (0..40).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_run_each_respects_worker_limit() {
        let scheduler = BatchScheduler::new("test", 1, 3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = scheduler
            .run_each((0..20u32).collect(), &CancellationToken::new(), |item| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, TestError>(item)
                }
            })
            .await;

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(results.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_item_failure_isolated() {
        let scheduler = BatchScheduler::new("test", 1, 4);

        let results = scheduler
            .run_each((0..5u32).collect(), &CancellationToken::new(), |item| async move {
                if item == 2 {
                    Err(TestError::Item("boom".into()))
                } else {
                    Ok(item)
                }
            })
            .await;

        assert_eq!(results[2], Err(TestError::Item("boom".into())));
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 4);
    }

    #[tokio::test]
    async fn test_panicking_batch_fails_only_its_items() {
        let scheduler = BatchScheduler::new("test", 2, 2);

        let results = scheduler
            .run_batched((0..6u32).collect(), &CancellationToken::new(), |batch| async move {
                if batch.contains(&3) {
                    panic!("worker crashed");
                }
                ok_all(batch)
            })
            .await;

        assert!(matches!(results[2], Err(TestError::Batch(BatchFailure::Panicked { .. }))));
        assert!(matches!(results[3], Err(TestError::Batch(BatchFailure::Panicked { .. }))));
        assert_eq!(results[0], Ok(0));
        assert_eq!(results[5], Ok(50));
    }

    #[tokio::test]
    async fn test_length_mismatch_fails_batch() {
        let scheduler = BatchScheduler::new("test", 3, 1);

        let results = scheduler
            .run_batched((0..3u32).collect(), &CancellationToken::new(), |batch| async move {
                let mut out = ok_all(batch);
                out.pop();
                out
            })
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| *r
            == Err(TestError::Batch(BatchFailure::LengthMismatch {
                expected: 3,
                got: 2
            }))));
    }

    #[tokio::test]
    async fn test_cancel_stops_new_dispatch() {
        let scheduler = BatchScheduler::new("test", 2, 1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let results = scheduler
            .run_batched((0..6u32).collect(), &cancel, move |batch| {
                trigger.cancel();
                async move { ok_all(batch) }
            })
            .await;

        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Ok(10));
        assert!(results[2..]
            .iter()
            .all(|r| *r == Err(TestError::Batch(BatchFailure::Cancelled))));
    }
}
