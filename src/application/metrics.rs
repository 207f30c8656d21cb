//! Observability metrics for the rate limit gate.
//!
//! Counters are shared by every clone of a gate, so a single handle kept by
//! a health check sees traffic from all request handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking gate decisions.
///
/// All metrics use atomic operations for thread-safe updates and reads.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    calls_allowed: AtomicU64,
    calls_denied: AtomicU64,
    store_failures: AtomicU64,
    buckets_pruned: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.calls_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.calls_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.inner.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pruned(&self, count: usize) {
        self.inner
            .buckets_pruned
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Calls that were allowed, including fail-open decisions.
    pub fn calls_allowed(&self) -> u64 {
        self.inner.calls_allowed.load(Ordering::Relaxed)
    }

    /// Calls that were denied.
    pub fn calls_denied(&self) -> u64 {
        self.inner.calls_denied.load(Ordering::Relaxed)
    }

    /// Store operations that failed.
    pub fn store_failures(&self) -> u64 {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    /// Buckets removed by pruning.
    pub fn buckets_pruned(&self) -> u64 {
        self.inner.buckets_pruned.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls_allowed: self.calls_allowed(),
            calls_denied: self.calls_denied(),
            store_failures: self.store_failures(),
            buckets_pruned: self.buckets_pruned(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.calls_allowed.store(0, Ordering::Relaxed);
        self.inner.calls_denied.store(0, Ordering::Relaxed);
        self.inner.store_failures.store(0, Ordering::Relaxed);
        self.inner.buckets_pruned.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Calls allowed through
    pub calls_allowed: u64,
    /// Calls denied
    pub calls_denied: u64,
    /// Store operations that failed
    pub store_failures: u64,
    /// Buckets removed by pruning
    pub buckets_pruned: u64,
}

impl MetricsSnapshot {
    /// Ratio of denied calls to total calls (0.0 to 1.0).
    ///
    /// Returns 0.0 if no calls have been processed.
    pub fn denial_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            0.0
        } else {
            self.calls_denied as f64 / total as f64
        }
    }

    /// Total calls processed (allowed + denied).
    pub fn total_calls(&self) -> u64 {
        self.calls_allowed.saturating_add(self.calls_denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initial_state() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot {
            calls_allowed: 0,
            calls_denied: 0,
            store_failures: 0,
            buckets_pruned: 0,
        });
    }

    #[test]
    fn test_denial_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().denial_rate(), 0.0);

        metrics.record_allowed();
        metrics.record_denied();
        assert!((metrics.snapshot().denial_rate() - 0.5).abs() < f64::EPSILON);

        metrics.record_denied();
        metrics.record_denied();
        assert!((metrics.snapshot().denial_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(metrics.snapshot().total_calls(), 4);
    }

    #[test]
    fn test_pruned_accumulates() {
        let metrics = Metrics::new();
        metrics.record_pruned(3);
        metrics.record_pruned(0);
        metrics.record_pruned(2);
        assert_eq!(metrics.buckets_pruned(), 5);
    }

    #[test]
    fn test_reset_and_shared_clone() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_allowed();
        clone.record_store_failure();
        assert_eq!(metrics.calls_allowed(), 1);
        assert_eq!(metrics.store_failures(), 1);

        metrics.reset();
        assert_eq!(clone.snapshot().total_calls(), 0);
        assert_eq!(clone.store_failures(), 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_allowed();
                        m.record_denied();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.calls_allowed(), 800);
        assert_eq!(metrics.calls_denied(), 800);
    }
}
