//! Process-wide atomic counters for connector activity.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an integration cycle).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    processes_spawned: AtomicU64,
    retries_attempted: AtomicU64,
    labels_applied: AtomicU64,
    labels_removed: AtomicU64,
    disconnects_issued: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            processes_spawned: AtomicU64::new(0),
            retries_attempted: AtomicU64::new(0),
            labels_applied: AtomicU64::new(0),
            labels_removed: AtomicU64::new(0),
            disconnects_issued: AtomicU64::new(0),
        }
    }

    pub fn inc_processes_spawned(&self) {
        self.processes_spawned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "processes_spawned", "counter incremented");
    }

    pub fn inc_retries(&self) {
        self.retries_attempted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries_attempted", "counter incremented");
    }

    pub fn inc_labels_applied(&self) {
        self.labels_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "labels_applied", "counter incremented");
    }

    pub fn inc_labels_removed(&self) {
        self.labels_removed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "labels_removed", "counter incremented");
    }

    pub fn inc_disconnects(&self) {
        self.disconnects_issued.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "disconnects_issued", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            processes_spawned = self.processes_spawned(),
            retries_attempted = self.retries_attempted(),
            labels_applied = self.labels_applied(),
            labels_removed = self.labels_removed(),
            disconnects_issued = self.disconnects_issued(),
        );
    }

    pub fn processes_spawned(&self) -> u64 {
        self.processes_spawned.load(Ordering::Relaxed)
    }

    pub fn retries_attempted(&self) -> u64 {
        self.retries_attempted.load(Ordering::Relaxed)
    }

    pub fn labels_applied(&self) -> u64 {
        self.labels_applied.load(Ordering::Relaxed)
    }

    pub fn labels_removed(&self) -> u64 {
        self.labels_removed.load(Ordering::Relaxed)
    }

    pub fn disconnects_issued(&self) -> u64 {
        self.disconnects_issued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_counters_increment() {
        let metrics = Metrics::new();
        metrics.inc_processes_spawned();
        metrics.inc_processes_spawned();
        metrics.inc_retries();
        metrics.inc_disconnects();
        assert_eq!(metrics.processes_spawned(), 2);
        assert_eq!(metrics.retries_attempted(), 1);
        assert_eq!(metrics.labels_applied(), 0);
        assert_eq!(metrics.disconnects_issued(), 1);
        metrics.flush();
    }
}
