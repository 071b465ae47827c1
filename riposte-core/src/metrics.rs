//! Runtime counters for the parry engine and progression pipeline.
//!
//! Every component increments these through the shared [`crate::store::Store`]
//! handle. Reads happen on dashboard export only.
//!
//! Design: lock-free `AtomicU64` counters, relaxed ordering. Values are
//! monotonic totals since process start, not per-database.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for high-frequency events.
#[derive(Debug)]
pub struct RiposteCounters {
    /// Windows newly created by `activate`.
    pub windows_activated: AtomicU64,
    /// Resolutions that ended in PERFECT.
    pub parries_perfect: AtomicU64,
    /// Resolutions that ended in SUCCESS.
    pub parries_success: AtomicU64,
    /// Windows that ended in FAILED (late resolve or expiry).
    pub parries_failed: AtomicU64,
    /// Windows that ended in CANCELLED.
    pub windows_cancelled: AtomicU64,
    /// First-time counterattack recordings.
    pub counterattacks: AtomicU64,
    /// Events appended to the log.
    pub events_logged: AtomicU64,
    /// Events claimed and folded by the aggregator.
    pub events_processed: AtomicU64,
    /// Events consumed with zero deltas because their context was malformed.
    pub events_malformed: AtomicU64,
    /// Achievement rungs granted (tiers and repetitions).
    pub tiers_granted: AtomicU64,
}

impl RiposteCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            windows_activated: AtomicU64::new(0),
            parries_perfect: AtomicU64::new(0),
            parries_success: AtomicU64::new(0),
            parries_failed: AtomicU64::new(0),
            windows_cancelled: AtomicU64::new(0),
            counterattacks: AtomicU64::new(0),
            events_logged: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            events_malformed: AtomicU64::new(0),
            tiers_granted: AtomicU64::new(0),
        }
    }

    /// Add `n` to a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            windows_activated: self.windows_activated.load(Ordering::Relaxed),
            parries_perfect: self.parries_perfect.load(Ordering::Relaxed),
            parries_success: self.parries_success.load(Ordering::Relaxed),
            parries_failed: self.parries_failed.load(Ordering::Relaxed),
            windows_cancelled: self.windows_cancelled.load(Ordering::Relaxed),
            counterattacks: self.counterattacks.load(Ordering::Relaxed),
            events_logged: self.events_logged.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            tiers_granted: self.tiers_granted.load(Ordering::Relaxed),
        }
    }
}

impl Default for RiposteCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Windows created.
    pub windows_activated: u64,
    /// PERFECT resolutions.
    pub parries_perfect: u64,
    /// SUCCESS resolutions.
    pub parries_success: u64,
    /// FAILED windows.
    pub parries_failed: u64,
    /// CANCELLED windows.
    pub windows_cancelled: u64,
    /// Recorded counterattacks.
    pub counterattacks: u64,
    /// Appended events.
    pub events_logged: u64,
    /// Aggregated events.
    pub events_processed: u64,
    /// Malformed events consumed.
    pub events_malformed: u64,
    /// Granted achievement rungs.
    pub tiers_granted: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP riposte_windows_activated_total Parry windows opened\n\
             # TYPE riposte_windows_activated_total counter\n\
             riposte_windows_activated_total {}\n\
             # HELP riposte_parries_total Parry window outcomes\n\
             # TYPE riposte_parries_total counter\n\
             riposte_parries_total{{status=\"perfect\"}} {}\n\
             riposte_parries_total{{status=\"success\"}} {}\n\
             riposte_parries_total{{status=\"failed\"}} {}\n\
             riposte_parries_total{{status=\"cancelled\"}} {}\n\
             # HELP riposte_counterattacks_total Counterattacks recorded\n\
             # TYPE riposte_counterattacks_total counter\n\
             riposte_counterattacks_total {}\n\
             # HELP riposte_events_logged_total Gameplay events appended\n\
             # TYPE riposte_events_logged_total counter\n\
             riposte_events_logged_total {}\n\
             # HELP riposte_events_processed_total Gameplay events aggregated\n\
             # TYPE riposte_events_processed_total counter\n\
             riposte_events_processed_total {}\n\
             # HELP riposte_events_malformed_total Events consumed with malformed context\n\
             # TYPE riposte_events_malformed_total counter\n\
             riposte_events_malformed_total {}\n\
             # HELP riposte_tiers_granted_total Achievement rungs granted\n\
             # TYPE riposte_tiers_granted_total counter\n\
             riposte_tiers_granted_total {}\n",
            self.windows_activated,
            self.parries_perfect,
            self.parries_success,
            self.parries_failed,
            self.windows_cancelled,
            self.counterattacks,
            self.events_logged,
            self.events_processed,
            self.events_malformed,
            self.tiers_granted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let counters = RiposteCounters::new();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn snapshot_reflects_increments() {
        let counters = RiposteCounters::new();
        RiposteCounters::add(&counters.events_logged, 3);
        RiposteCounters::add(&counters.parries_perfect, 1);
        let snap = counters.snapshot();
        assert_eq!(snap.events_logged, 3);
        assert_eq!(snap.parries_perfect, 1);
    }

    #[test]
    fn prometheus_export_labels_outcomes() {
        let snap = CounterSnapshot {
            parries_failed: 7,
            ..CounterSnapshot::default()
        };
        let text = snap.to_prometheus();
        assert!(text.contains("riposte_parries_total{status=\"failed\"} 7"));
        assert!(text.contains("# TYPE riposte_tiers_granted_total counter"));
    }
}
