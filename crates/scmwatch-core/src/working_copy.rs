//! Incremental-update versus full-checkout decision.

use std::path::Path;

/// How a connector should materialize its working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkout {
    /// A working copy exists; bring it up to date.
    Incremental,
    /// No usable working copy; fetch everything.
    Full,
}

impl Checkout {
    /// `Incremental` when `marker` exists under `dir` and a full checkout is
    /// not forced. Backends without a marker always check out in full.
    pub fn decide(dir: &Path, marker: Option<&str>, force_full: bool) -> Self {
        match marker {
            Some(marker) if !force_full && dir.join(marker).exists() => Checkout::Incremental,
            _ => Checkout::Full,
        }
    }

    /// For backends without a marker file: an existing, non-empty directory
    /// is updated in place.
    pub fn decide_dir(dir: &Path, force_full: bool) -> Self {
        let populated = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if populated && !force_full {
            Checkout::Incremental
        } else {
            Checkout::Full
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Checkout::Full)
    }
}
