//! Bounded-concurrency batch dispatch with inter-batch spacing.
//!
//! Items are split into consecutive batches of at most `batch_size`. Every
//! item of a batch runs as its own tokio task; the next batch starts only
//! after the previous one has fully completed *and* at least
//! `request_delay` has passed since the previous batch was dispatched.
//! Results come back in input order regardless of completion order.

use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::METRICS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Minimum spacing between the starts of consecutive batches.
    pub request_delay: Duration,
    /// When false every batch holds a single item.
    pub use_batch: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            request_delay: Duration::from_secs(1),
            use_batch: true,
        }
    }
}

impl BatchConfig {
    pub fn effective_batch_size(&self) -> usize {
        if self.use_batch {
            self.batch_size.max(1)
        } else {
            1
        }
    }
}

/// Why a task produced no result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled")]
    Cancelled,
}

impl From<JoinError> for TaskFailure {
    fn from(err: JoinError) -> Self {
        if !err.is_panic() {
            return TaskFailure::Cancelled;
        }
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        TaskFailure::Panicked(message)
    }
}

#[derive(Debug)]
pub struct BatchReport<R> {
    /// One entry per input item, same order as the input.
    pub results: Vec<Result<R, TaskFailure>>,
    pub batches: usize,
}

/// Aborts still-running tasks if the dispatching future is dropped.
struct AbortOnDrop<T>(Vec<JoinHandle<T>>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestBatcher {
    config: BatchConfig,
}

impl RequestBatcher {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Index ranges of the batches `len` items would be split into.
    pub fn partition(&self, len: usize) -> Vec<Range<usize>> {
        let size = self.config.effective_batch_size();
        (0..len)
            .step_by(size)
            .map(|start| start..(start + size).min(len))
            .collect()
    }

    /// Run `work` over every item, batch by batch.
    ///
    /// A panicking or cancelled task is reported in its slot and does not
    /// affect its siblings.
    pub async fn dispatch<T, R, F, Fut>(&self, items: Vec<T>, work: F) -> BatchReport<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = R> + Send + 'static,
    {
        let ranges = self.partition(items.len());
        let mut results = Vec::with_capacity(items.len());
        let mut pending = items.into_iter();
        let mut last_dispatch: Option<Instant> = None;

        for (number, range) in ranges.iter().enumerate() {
            if let Some(prev) = last_dispatch {
                tokio::time::sleep_until(prev + self.config.request_delay).await;
            }
            last_dispatch = Some(Instant::now());
            METRICS.inc_batches();
            debug!(batch = number + 1, of = ranges.len(), size = range.len(), "dispatching batch");

            let mut tasks = AbortOnDrop(
                pending
                    .by_ref()
                    .take(range.len())
                    .map(|item| tokio::spawn(work(item)))
                    .collect(),
            );

            for joined in join_all(tasks.0.iter_mut()).await {
                results.push(joined.map_err(|e| {
                    let failure = TaskFailure::from(e);
                    warn!(batch = number + 1, error = %failure, "batch task did not complete");
                    failure
                }));
            }
        }

        BatchReport {
            results,
            batches: ranges.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn batcher(batch_size: usize, delay_ms: u64, use_batch: bool) -> RequestBatcher {
        RequestBatcher::new(BatchConfig {
            batch_size,
            request_delay: Duration::from_millis(delay_ms),
            use_batch,
        })
    }

    #[test]
    fn test_partition_sizes() {
        assert_eq!(batcher(2, 0, true).partition(5), vec![0..2, 2..4, 4..5]);
        assert_eq!(batcher(2, 0, false).partition(3), vec![0..1, 1..2, 2..3]);
        assert_eq!(batcher(0, 0, true).partition(2), vec![0..1, 1..2]);
        assert!(batcher(4, 0, true).partition(0).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_input_order() {
        let report = batcher(4, 0, true)
            .dispatch(vec![40u64, 10, 30, 20], |ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms * 2
            })
            .await;
        let values: Vec<u64> = report.results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![80, 20, 60, 40]);
        assert_eq!(report.batches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_spaced_by_request_delay() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();
        let log = starts.clone();

        let report = batcher(2, 500, true)
            .dispatch(vec![0, 1, 2, 3, 4], move |i| {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push((i, Instant::now() - origin));
                    i
                }
            })
            .await;
        assert_eq!(report.batches, 3);

        let starts = starts.lock().unwrap().clone();
        let at = |i: usize| starts.iter().find(|(x, _)| *x == i).unwrap().1;
        assert_eq!(at(0), at(1));
        assert!(at(2) >= at(0) + Duration::from_millis(500));
        assert!(at(4) >= at(2) + Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_does_not_add_to_slow_batches() {
        let origin = Instant::now();
        let report = batcher(1, 100, true)
            .dispatch(vec![300u64, 0], move |ms| async move {
                let started = Instant::now() - origin;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                started
            })
            .await;
        let second = report.results[1].clone().unwrap();
        assert_eq!(second, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let report = batcher(3, 0, true)
            .dispatch(vec![1, 2, 3], |i| async move {
                if i == 2 {
                    panic!("boom");
                }
                i
            })
            .await;
        assert_eq!(report.results[0], Ok(1));
        assert!(matches!(&report.results[1], Err(TaskFailure::Panicked(m)) if m.contains("boom")));
        assert_eq!(report.results[2], Ok(3));
    }
}
