//! Process-backed execution shared by every connector.

use std::sync::Arc;

use crate::error::{Result, ScmError};
use crate::process::{CommandExecutor, ProcessExecutor, ProcessInfo, ProcessOutput};
use crate::retry::RetryPolicy;

/// Executes a connector's command lines through an injected [`ProcessExecutor`],
/// applying the connector's retry policy when it has one.
#[derive(Clone)]
pub struct ProcessRunner {
    executor: Arc<dyn ProcessExecutor>,
    retry: Option<RetryPolicy>,
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Arc::new(CommandExecutor))
    }
}

impl ProcessRunner {
    pub fn new(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            executor,
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: Option<RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Run the command, failing on a non-zero exit code.
    pub async fn run(&self, info: &ProcessInfo) -> Result<ProcessOutput> {
        match &self.retry {
            Some(policy) => policy.run(|| self.run_once(info)).await,
            None => self.run_once(info).await,
        }
    }

    /// Run the command once and return its output whatever the exit code.
    pub async fn run_unchecked(&self, info: &ProcessInfo) -> Result<ProcessOutput> {
        self.executor.execute(info).await
    }

    async fn run_once(&self, info: &ProcessInfo) -> Result<ProcessOutput> {
        let output = self.executor.execute(info).await?;
        if !output.succeeded() {
            let stderr = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(ScmError::ProcessFailed {
                command: info.display(),
                exit_code: output.exit_code,
                stderr,
            });
        }
        Ok(output)
    }
}
