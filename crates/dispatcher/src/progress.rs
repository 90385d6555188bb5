//! Per-job progress accounting

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Count one finished probe.
    pub fn record(&self, failed: bool) {
        let counter = if failed { &self.failed } else { &self.completed };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn log_summary(&self, receipt: &str) {
        let completed = self.completed();
        let failed = self.failed();
        if self.total > 0 {
            info!(
                receipt,
                total = self.total,
                completed,
                failed,
                "job finished, success rate {:.1}%",
                (completed as f64 / self.total as f64) * 100.0
            );
        } else {
            info!(receipt, "job finished with no probes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_outcomes() {
        let progress = ProgressTracker::new(3);
        progress.record(false);
        progress.record(true);
        progress.record(false);
        assert_eq!(progress.total(), 3);
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.failed(), 1);
    }
}
