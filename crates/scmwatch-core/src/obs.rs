//! Structured observability hooks for connector lifecycle events.
//!
//! Events are emitted at `info!` level; the binary decides formatting
//! (`RUST_LOG` for filtering, `--json` for newline-delimited JSON).
//!
//! Connector operations run inside a `scmwatch.connector` span carrying
//! `backend` and `project`, so these events need not repeat the project.

use tracing::info;

use crate::metrics::METRICS;

pub fn emit_changes_detected(backend: &str, count: usize) {
    info!(event = "changes.detected", backend = %backend, count = count);
}

pub fn emit_working_copy_materialized(backend: &str, full: bool) {
    info!(event = "working_copy.materialized", backend = %backend, full = full);
}

pub fn emit_label_applied(backend: &str, label: &str) {
    METRICS.inc_labels_applied();
    info!(event = "label.applied", backend = %backend, label = %label);
}

pub fn emit_label_removed(backend: &str, label: &str) {
    METRICS.inc_labels_removed();
    info!(event = "label.removed", backend = %backend, label = %label);
}

pub fn emit_label_skipped(backend: &str, reason: &str) {
    tracing::debug!(event = "label.skipped", backend = %backend, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_events_count() {
        let (applied, removed) = (METRICS.labels_applied(), METRICS.labels_removed());
        emit_label_applied("cvs", "build-1");
        emit_label_removed("cvs", "build-1");
        emit_changes_detected("cvs", 0);
        assert!(METRICS.labels_applied() > applied);
        assert!(METRICS.labels_removed() > removed);
    }
}
