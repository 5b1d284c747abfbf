//! Bounded-concurrency batch execution.
//!
//! `run_batch` applies a per-item transform over a list of paths on a
//! dedicated rayon pool. Workers only touch their own item and send the
//! outcome over a channel; the calling thread is the single collector that
//! owns the counters, the failure list and progress reporting. A failing or
//! panicking item is recorded and the batch carries on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::color_utils::{progress::create_batch_progress_bar, symbols};
use crate::error::ItemError;
use crate::progress::{remove_progress_bar, should_report, ThroughputSample};

/// Default pool size for cheap, CPU-light transforms such as thresholding
pub const DEFAULT_CHEAP_CONCURRENCY: usize = 4;
/// Default pool size for expensive transforms such as learned matting
pub const DEFAULT_HEAVY_CONCURRENCY: usize = 2;

/// Options controlling one batch run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of worker threads
    pub concurrency: usize,
    /// Emit a progress line every this many completions
    pub report_every: usize,
    /// Stage name used in log lines and progress bars
    pub stage: String,
}

impl BatchOptions {
    pub fn new(stage: impl Into<String>, concurrency: usize, report_every: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            report_every,
            stage: stage.into(),
        }
    }
}

/// A recorded per-item failure
#[derive(Debug)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub error: ItemError,
}

/// Outcome of a batch run. `succeeded` is in completion order, not submission order.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub succeeded: Vec<(PathBuf, T)>,
    pub failed: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl<T> BatchResult<T> {
    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Single point of consolidation for worker outcomes
struct Collector<T> {
    succeeded: Vec<(PathBuf, T)>,
    failed: Vec<ItemFailure>,
    total: usize,
    started: Instant,
    options: BatchOptions,
    progress_bar: Option<indicatif::ProgressBar>,
}

impl<T> Collector<T> {
    fn new(total: usize, options: BatchOptions) -> Self {
        let progress_bar = create_batch_progress_bar(total, &options.stage);
        Self {
            succeeded: Vec::with_capacity(total),
            failed: Vec::new(),
            total,
            started: Instant::now(),
            options,
            progress_bar,
        }
    }

    fn done(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    fn record(&mut self, path: PathBuf, outcome: Result<T, ItemError>) {
        match outcome {
            Ok(value) => {
                debug!("{} {}", symbols::completed_successfully(), path.display());
                self.succeeded.push((path, value));
            }
            Err(error) => {
                warn!(
                    "{}Failed to process {}: {}",
                    symbols::warning(),
                    path.display(),
                    error
                );
                self.failed.push(ItemFailure { path, error });
            }
        }

        let done = self.done();
        if let Some(pb) = &self.progress_bar {
            pb.set_position(done as u64);
        }
        if should_report(done, self.total, self.options.report_every) {
            let sample = ThroughputSample::new(done, self.total, self.started.elapsed());
            info!(
                "{} [{}] {}",
                symbols::progress(),
                self.options.stage,
                sample.describe()
            );
        }
    }

    fn finish(self) -> BatchResult<T> {
        if let Some(pb) = &self.progress_bar {
            pb.finish_and_clear();
            remove_progress_bar(pb);
        }
        BatchResult {
            succeeded: self.succeeded,
            failed: self.failed,
            elapsed: self.started.elapsed(),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Apply `transform` to every item with at most `options.concurrency` running at once.
///
/// Only pool construction can fail; per-item errors end up in `BatchResult::failed`.
pub fn run_batch<T, F>(items: &[PathBuf], transform: F, options: &BatchOptions) -> Result<BatchResult<T>>
where
    T: Send,
    F: Fn(&Path) -> Result<T, ItemError> + Sync,
{
    let mut collector = Collector::new(items.len(), options.clone());
    if items.is_empty() {
        return Ok(collector.finish());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.concurrency.max(1))
        .thread_name({
            let stage = options.stage.clone();
            move |i| format!("{stage}-worker-{i}")
        })
        .build()?;

    debug!(
        "[{}] starting {} item(s) on {} worker(s)",
        options.stage,
        items.len(),
        options.concurrency
    );

    let (tx, rx) = mpsc::channel::<(PathBuf, Result<T, ItemError>)>();
    let transform = &transform;

    std::thread::scope(|scope| {
        scope.spawn(move || {
            pool.install(|| {
                items.par_iter().for_each_with(tx, |tx, item| {
                    let outcome = catch_unwind(AssertUnwindSafe(|| transform(item)))
                        .unwrap_or_else(|payload| {
                            Err(ItemError::Transform(panic_message(payload)))
                        });
                    // Receiver lives until every sender is dropped
                    let _ = tx.send((item.clone(), outcome));
                });
            });
        });

        for (path, outcome) in rx {
            collector.record(path, outcome);
        }
    });

    let result = collector.finish();
    log_batch_summary(&options.stage, &result);
    Ok(result)
}

fn log_batch_summary<T>(stage: &str, result: &BatchResult<T>) {
    let secs = result.elapsed.as_secs_f64();
    if result.failure_count() == 0 {
        info!(
            "{} [{}] {} succeeded in {:.1}s",
            symbols::completed_successfully(),
            stage,
            result.success_count(),
            secs
        );
    } else {
        warn!(
            "{} [{}] {} succeeded, {} failed in {:.1}s",
            symbols::completed_partially_successfully(),
            stage,
            result.success_count(),
            result.failure_count(),
            secs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn items(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("item_{i:03}.png"))).collect()
    }

    #[test]
    fn test_forced_failures_are_counted_once() {
        let items = items(25);
        let options = BatchOptions::new("test", 4, 5);

        let result = run_batch(
            &items,
            |path| {
                let name = path.to_string_lossy();
                let index: usize = name[5..8].parse().unwrap();
                if index % 5 == 0 {
                    Err(ItemError::Transform(format!("forced {index}")))
                } else {
                    Ok(index)
                }
            },
            &options,
        )
        .unwrap();

        assert_eq!(result.success_count(), 20);
        assert_eq!(result.failure_count(), 5);
        assert_eq!(result.total(), 25);

        let failed: HashSet<_> = result.failed.iter().map(|f| f.path.clone()).collect();
        assert_eq!(failed.len(), 5, "each failure must appear exactly once");
        for i in [0, 5, 10, 15, 20] {
            assert!(failed.contains(&PathBuf::from(format!("item_{i:03}.png"))));
        }
    }

    #[test]
    fn test_panicking_item_does_not_abort_batch() {
        let items = items(6);
        let options = BatchOptions::new("panic", 2, 100);

        let result = run_batch(
            &items,
            |path| {
                if path.ends_with("item_003.png") {
                    panic!("boom");
                }
                Ok(())
            },
            &options,
        )
        .unwrap();

        assert_eq!(result.success_count(), 5);
        assert_eq!(result.failure_count(), 1);
        match &result.failed[0].error {
            ItemError::Transform(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let items = items(32);
        let options = BatchOptions::new("bounded", 3, 0);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let result = run_batch(
            &items,
            |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(5));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
            &options,
        )
        .unwrap();

        assert_eq!(result.success_count(), 32);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_empty_batch() {
        let options = BatchOptions::new("empty", 4, 10);
        let result: BatchResult<()> = run_batch(&[], |_| Ok(()), &options).unwrap();
        assert_eq!(result.total(), 0);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let options = BatchOptions::new("clamped", 0, 10);
        assert_eq!(options.concurrency, 1);
        let result = run_batch(&items(3), |_| Ok(1u8), &options).unwrap();
        assert_eq!(result.success_count(), 3);
    }
}
