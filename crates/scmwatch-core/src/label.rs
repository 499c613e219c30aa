//! Bookkeeping for labels applied before the source is retrieved.
//!
//! Some backends label the repository first and then fetch exactly the
//! labelled state. If the build then fails the label must come off again, but
//! only when this cycle put it there.

use crate::result::IntegrationResult;

/// Tracks whether the current integration cycle applied a label.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LabelTracker {
    applied: Option<String>,
}

impl LabelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of a new integration cycle. Called from `detect_changes`.
    pub fn begin_cycle(&mut self) {
        self.applied = None;
    }

    pub fn mark_applied(&mut self, label: impl Into<String>) {
        self.applied = Some(label.into());
    }

    pub fn applied(&self) -> bool {
        self.applied.is_some()
    }

    pub fn applied_label(&self) -> Option<&str> {
        self.applied.as_deref()
    }

    /// The label to remove for this result, if any.
    ///
    /// Only a failed result whose label was applied by this cycle qualifies.
    pub fn label_to_remove(&self, result: &IntegrationResult) -> Option<&str> {
        if result.succeeded() {
            return None;
        }
        self.applied.as_deref()
    }

    pub fn should_remove(&self, result: &IntegrationResult) -> bool {
        self.label_to_remove(result).is_some()
    }

    /// Forget the applied label once it has been removed.
    pub fn clear(&mut self) {
        self.applied = None;
    }
}
