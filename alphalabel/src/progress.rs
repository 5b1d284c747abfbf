//! Progress reporting for batch stages.
//!
//! A global `MultiProgress` lets any stage add a bar without threading the
//! instance through every call. Log-based progress is count-sampled: a line is
//! emitted every `interval` completions and on the final item, so output volume
//! stays bounded however large the batch is.

use indicatif::MultiProgress;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

static MULTI: Lazy<Arc<MultiProgress>> = Lazy::new(|| Arc::new(MultiProgress::new()));

/// Get a handle to the global multi-progress bar.
pub fn global_mp() -> Arc<MultiProgress> {
    MULTI.clone()
}

pub fn add_progress_bar(pb: indicatif::ProgressBar) {
    global_mp().add(pb);
}

pub fn remove_progress_bar(pb: &indicatif::ProgressBar) {
    global_mp().remove(pb);
}

/// True when the `done`-th completion should produce a progress line.
pub fn should_report(done: usize, total: usize, interval: usize) -> bool {
    done > 0 && (done == total || (interval > 0 && done % interval == 0))
}

/// Throughput snapshot computed from completed count and elapsed time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub done: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl ThroughputSample {
    pub fn new(done: usize, total: usize, elapsed: Duration) -> Self {
        Self {
            done,
            total,
            elapsed,
        }
    }

    /// Items completed per second so far
    pub fn items_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.done as f64 / secs
        } else {
            0.0
        }
    }

    /// Estimated time to finish the remaining items at the current rate
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.items_per_sec();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.done) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }

    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            self.done * 100 / self.total
        }
    }

    /// One-line human summary, e.g. `120/400 (30%) - 12.5 items/s - ETA 22s`
    pub fn describe(&self) -> String {
        let eta = match self.eta() {
            Some(eta) => format!("ETA {:.0}s", eta.as_secs_f64()),
            None => "ETA unknown".to_string(),
        };
        format!(
            "{}/{} ({}%) - {:.1} items/s - {}",
            self.done,
            self.total,
            self.percent(),
            self.items_per_sec(),
            eta
        )
    }
}
