//! Differential label re-stamping against a baseline label.
//!
//! To move a label forward, only revisions that are new relative to the old
//! label's history need the new label. The baseline history is fetched once
//! per integration cycle and reused by every later call in that cycle.

use std::future::Future;

use crate::error::Result;
use crate::modification::{diff_modifications, Modification};

#[derive(Debug, Default, Clone)]
pub struct DifferentialRestamper {
    baseline: Option<Vec<Modification>>,
}

impl DifferentialRestamper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached baseline at the start of a new integration cycle.
    pub fn begin_cycle(&mut self) {
        self.baseline = None;
    }

    pub fn is_cached(&self) -> bool {
        self.baseline.is_some()
    }

    /// Records in `current` that the baseline label does not already cover.
    ///
    /// `fetch_baseline` runs at most once per cycle.
    pub async fn pending<F, Fut>(
        &mut self,
        current: &[Modification],
        fetch_baseline: F,
    ) -> Result<Vec<Modification>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Modification>>>,
    {
        if self.baseline.is_none() {
            let baseline = fetch_baseline().await?;
            tracing::debug!(baseline = baseline.len(), "cached baseline label history");
            self.baseline = Some(baseline);
        }
        let baseline = self.baseline.as_deref().unwrap_or_default();
        Ok(diff_modifications(current, baseline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::ModificationKind;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rev(file: &str, version: &str) -> Modification {
        Modification::new(
            ModificationKind::Modified,
            "src",
            file,
            Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
        )
        .with_version(version)
    }

    #[tokio::test]
    async fn test_baseline_fetched_once_per_cycle() {
        let fetches = AtomicU32::new(0);
        let mut restamper = DifferentialRestamper::new();
        let current = vec![rev("a.c", "1.2"), rev("b.c", "1.5")];

        for _ in 0..3 {
            let pending = restamper
                .pending(&current, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![rev("a.c", "1.2")])
                })
                .await
                .unwrap();
            assert_eq!(pending, vec![rev("b.c", "1.5")]);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        restamper.begin_cycle();
        assert!(!restamper.is_cached());
        restamper
            .pending(&current, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
            .await
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let mut restamper = DifferentialRestamper::new();
        let err = restamper
            .pending(&[], || async {
                Err(crate::error::ScmError::backend("pvcs", "label not found"))
            })
            .await;
        assert!(err.is_err());
        assert!(!restamper.is_cached());
    }
}
