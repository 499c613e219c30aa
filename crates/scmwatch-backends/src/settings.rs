//! Settings shared by every process-backed connector.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use scmwatch_core::{
    IntegrationResult, ProcessExecutor, ProcessInfo, ProcessRunner, RecordPolicy, Result,
    RetryPolicy, DEFAULT_TIMEOUT_SECS,
};

/// Flattened into each backend's configuration block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectorSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry for network-backed tools; absent means a single attempt.
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Working copy location, relative to the project's working directory.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub auto_get_source: bool,
    #[serde(default)]
    pub force_full_checkout: bool,
    #[serde(default)]
    pub label_on_success: bool,
    #[serde(default)]
    pub record_policy: RecordPolicy,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry: None,
            working_directory: None,
            auto_get_source: true,
            force_full_checkout: false,
            label_on_success: false,
            record_policy: RecordPolicy::default(),
        }
    }
}

impl ConnectorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn runner(&self, executor: Arc<dyn ProcessExecutor>) -> ProcessRunner {
        ProcessRunner::new(executor).with_retry(self.retry)
    }

    /// Command line carrying this connector's timeout.
    pub fn process(&self, executable: &str, args: Vec<String>) -> ProcessInfo {
        ProcessInfo::new(executable, args).with_timeout(self.timeout())
    }

    pub fn working_dir(&self, result: &IntegrationResult) -> PathBuf {
        result.base_from_working_directory(
            self.working_directory.as_deref().unwrap_or(Path::new("")),
        )
    }
}

pub(crate) async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}
