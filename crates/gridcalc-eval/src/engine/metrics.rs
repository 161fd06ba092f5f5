//! Per-pass counters and the statistics handed back to callers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use gridcalc_common::QualifiedCell;

/// Counters bumped concurrently by scheduler workers.
#[derive(Default)]
pub struct PassCounters {
    pub succeeded: AtomicUsize,
    pub errors: AtomicUsize,
    pub timed_out: AtomicUsize,
    pub circular: AtomicUsize,
    pub unresolved: AtomicUsize,
    pub pattern_resolved: AtomicUsize,
    pub pattern_groups: AtomicUsize,
}

impl PassCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_circular(&self) {
        self.circular.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unresolved(&self) {
        self.unresolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_pattern_resolved(&self, count: usize) {
        self.pattern_resolved.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_pattern_groups(&self, count: usize) {
        self.pattern_groups.fetch_add(count, Ordering::Relaxed);
    }

    /// Snapshot into a [`PassStats`]; structural fields are left at zero.
    pub fn snapshot(&self) -> PassStats {
        PassStats {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            circular: self.circular.load(Ordering::Relaxed),
            unresolved: self.unresolved.load(Ordering::Relaxed),
            pattern_resolved: self.pattern_resolved.load(Ordering::Relaxed),
            pattern_groups: self.pattern_groups.load(Ordering::Relaxed),
            ..PassStats::default()
        }
    }
}

/// A formula whose evaluation took longer than the configured threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SlowFormula {
    pub cell: QualifiedCell,
    pub elapsed: Duration,
}

/// Outcome counts of one recalculation pass.
///
/// `total` counts formula cells in the pass; every one of them lands in
/// exactly one of `succeeded`, `errors`, `timed_out`, `circular` or
/// `unresolved`. `pattern_resolved` is the subset of `succeeded` and
/// `errors` answered by the pattern optimizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassStats {
    pub total: usize,
    pub succeeded: usize,
    pub errors: usize,
    pub timed_out: usize,
    pub circular: usize,
    pub unresolved: usize,
    pub pattern_resolved: usize,
    pub pattern_groups: usize,
    pub levels: usize,
    pub batches: usize,
    pub elapsed: Duration,
    /// Slowest evaluations over the threshold, slowest first.
    pub slow_formulas: Vec<SlowFormula>,
}

impl PassStats {
    /// No formula failed, timed out, or sat on a cycle.
    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.timed_out == 0 && self.circular == 0 && self.unresolved == 0
    }
}

/// Timer helper for measuring pass phases
pub struct PassTimer {
    start: Instant,
}

impl PassTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_snapshot_into_stats() {
        let c = PassCounters::new();
        c.inc_succeeded();
        c.inc_succeeded();
        c.inc_errors();
        c.add_pattern_resolved(2);
        let stats = c.snapshot();
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.pattern_resolved, 2);
        assert!(!stats.is_clean());
        assert_eq!(stats.total, 0);
    }
}
