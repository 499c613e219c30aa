//! History parser contract and record-level error policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScmError};
use crate::modification::Modification;

/// Turns one backend's raw log output into modifications.
///
/// Implementations are pure: the same text and window always produce the
/// same output, and no scanner state survives a call.
pub trait HistoryParser {
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>>;
}

/// What a parser does with one malformed record inside a valid log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Abort the whole history fetch so no change is silently lost.
    #[default]
    Fail,
    /// Log the record and continue without it.
    Skip,
}

impl RecordPolicy {
    /// Apply the policy to a per-record outcome.
    ///
    /// `Ok(None)` means the record was skipped.
    pub fn handle<T>(self, outcome: Result<T>) -> Result<Option<T>> {
        match (outcome, self) {
            (Ok(value), _) => Ok(Some(value)),
            (Err(err @ ScmError::Record { .. }), RecordPolicy::Skip) => {
                tracing::warn!(error = %err, fragment = ?err.raw_payload(), "skipping malformed record");
                Ok(None)
            }
            (Err(err), _) => Err(err),
        }
    }
}
