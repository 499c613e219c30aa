//! The slice of the scheduler's integration result that connectors read.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::modification::Modification;

/// Outcome of an integration cycle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    #[default]
    Unknown,
    Success,
    Failure,
    Exception,
}

/// Per-cycle state handed to connectors by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub project_name: String,
    pub start_time: DateTime<Utc>,
    pub status: IntegrationStatus,
    /// Outcome of the previous integration, `Unknown` when there was none.
    pub last_integration_status: IntegrationStatus,
    pub label: String,
    pub working_directory: PathBuf,
    pub artifact_directory: PathBuf,
    #[serde(default)]
    pub modifications: Vec<Modification>,
}

impl IntegrationResult {
    pub fn new(
        project_name: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        artifact_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            start_time: Utc::now(),
            status: IntegrationStatus::Unknown,
            last_integration_status: IntegrationStatus::Unknown,
            label: String::new(),
            working_directory: working_directory.into(),
            artifact_directory: artifact_directory.into(),
            modifications: Vec::new(),
        }
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_status(mut self, status: IntegrationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_last_integration_status(mut self, status: IntegrationStatus) -> Self {
        self.last_integration_status = status;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == IntegrationStatus::Success
    }

    pub fn failed(&self) -> bool {
        matches!(
            self.status,
            IntegrationStatus::Failure | IntegrationStatus::Exception
        )
    }

    /// Resolves a relative path against the working directory.
    pub fn base_from_working_directory(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve(&self.working_directory, path.as_ref())
    }

    /// Resolves a relative path against the artifact directory.
    pub fn base_from_artifact_directory(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve(&self.artifact_directory, path.as_ref())
    }

    pub fn add_modifications(&mut self, modifications: impl IntoIterator<Item = Modification>) {
        self.modifications.extend(modifications);
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.as_os_str().is_empty() {
        base.to_path_buf()
    } else if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Project identity passed to `initialize` and `purge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectContext {
    pub name: String,
    pub working_directory: PathBuf,
    pub artifact_directory: PathBuf,
}

impl ProjectContext {
    pub fn new(
        name: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        artifact_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            working_directory: working_directory.into(),
            artifact_directory: artifact_directory.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        let result = IntegrationResult::new("proj", "/work", "/artifacts");
        assert!(!result.succeeded());
        assert!(!result.failed());

        let result = result.with_status(IntegrationStatus::Success);
        assert!(result.succeeded());

        let result = result.with_status(IntegrationStatus::Exception);
        assert!(result.failed());
    }

    #[test]
    fn test_base_from_working_directory() {
        let result = IntegrationResult::new("proj", "/work", "/artifacts");
        assert_eq!(result.base_from_working_directory(""), PathBuf::from("/work"));
        assert_eq!(
            result.base_from_working_directory("src"),
            PathBuf::from("/work/src")
        );
        assert_eq!(
            result.base_from_working_directory("/elsewhere"),
            PathBuf::from("/elsewhere")
        );
        assert_eq!(
            result.base_from_artifact_directory("logs"),
            PathBuf::from("/artifacts/logs")
        );
    }
}
