//! Counters for one resolution run.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Running tally of a resolution run.
///
/// Counters are atomic so concurrent resolutions can update them through a
/// shared reference.
#[derive(Debug, Default)]
pub struct RunStats {
    processed: AtomicUsize,
    cache_hits: AtomicUsize,
    complete: AtomicUsize,
    incomplete: AtomicUsize,
    source_calls: AtomicUsize,
    source_failures: AtomicUsize,
    store_failures: AtomicUsize,
    skipped: AtomicUsize,
}

impl RunStats {
    /// Creates a tally with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers fully resolved (emitted), whatever their completeness.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Identifiers that had a stored record.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::SeqCst)
    }

    /// Identifiers whose record ended complete.
    #[must_use]
    pub fn complete(&self) -> usize {
        self.complete.load(Ordering::SeqCst)
    }

    /// Identifiers whose record ended with wanted fields missing.
    #[must_use]
    pub fn incomplete(&self) -> usize {
        self.incomplete.load(Ordering::SeqCst)
    }

    /// Source fetches issued.
    #[must_use]
    pub fn source_calls(&self) -> usize {
        self.source_calls.load(Ordering::SeqCst)
    }

    /// Source fetches that failed.
    #[must_use]
    pub fn source_failures(&self) -> usize {
        self.source_failures.load(Ordering::SeqCst)
    }

    /// Store reads or writes that failed.
    #[must_use]
    pub fn store_failures(&self) -> usize {
        self.store_failures.load(Ordering::SeqCst)
    }

    /// Identifiers not started because the run was cancelled.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    pub(crate) fn record_processed(&self, complete: bool) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        if complete {
            self.complete.fetch_add(1, Ordering::SeqCst);
        } else {
            self.incomplete.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_source_call(&self) {
        self.source_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_stats_counts() {
        let stats = RunStats::new();
        stats.record_processed(true);
        stats.record_processed(false);
        stats.record_processed(false);
        stats.record_cache_hit();
        stats.record_source_call();
        stats.record_source_call();
        stats.record_source_failure();
        stats.record_store_failure();
        stats.record_skipped();

        assert_eq!(stats.processed(), 3);
        assert_eq!(stats.complete(), 1);
        assert_eq!(stats.incomplete(), 2);
        assert_eq!(stats.cache_hits(), 1);
        assert_eq!(stats.source_calls(), 2);
        assert_eq!(stats.source_failures(), 1);
        assert_eq!(stats.store_failures(), 1);
        assert_eq!(stats.skipped(), 1);
    }
}
