//! External process invocation with a hard timeout.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Result, ScmError};
use crate::metrics::METRICS;

/// Default timeout for a single external tool invocation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// A fully described command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub executable: String,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Values replaced with `******` when the command line is displayed.
    pub secrets: Vec<String>,
}

impl ProcessInfo {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            working_directory: None,
            env: BTreeMap::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            secrets: Vec::new(),
        }
    }

    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// The command line with secrets masked, for logs and error messages.
    pub fn display(&self) -> String {
        let mut line = self.executable.clone();
        for arg in &self.args {
            line.push(' ');
            let mut shown = arg.clone();
            for secret in &self.secrets {
                shown = shown.replace(secret.as_str(), "******");
            }
            if shown.contains(' ') {
                line.push('"');
                line.push_str(&shown);
                line.push('"');
            } else {
                line.push_str(&shown);
            }
        }
        line
    }
}

/// Accumulates arguments for a [`ProcessInfo`].
#[derive(Debug, Default, Clone)]
pub struct ProcessArgumentBuilder {
    args: Vec<String>,
}

impl ProcessArgumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn add_if(&mut self, condition: bool, arg: impl Into<String>) -> &mut Self {
        if condition {
            self.args.push(arg.into());
        }
        self
    }

    /// Adds `flag value` as two arguments when `value` is present and non-empty.
    pub fn add_pair(&mut self, flag: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.args.push(flag.to_string());
            self.args.push(value.to_string());
        }
        self
    }

    /// Adds `flagvalue` as one argument when `value` is present and non-empty.
    pub fn add_joined(&mut self, flag: &str, value: Option<&str>) -> &mut Self {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.args.push(format!("{flag}{value}"));
        }
        self
    }

    pub fn build(&self) -> Vec<String> {
        self.args.clone()
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launches external commands. Implemented by [`CommandExecutor`] and by test fakes.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run the command to completion or until its timeout elapses.
    async fn execute(&self, info: &ProcessInfo) -> Result<ProcessOutput>;
}

/// Runs commands with `tokio::process`; the child is killed when the timeout elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandExecutor;

#[async_trait]
impl ProcessExecutor for CommandExecutor {
    async fn execute(&self, info: &ProcessInfo) -> Result<ProcessOutput> {
        let start = Instant::now();
        let mut command = Command::new(&info.executable);
        command
            .args(&info.args)
            .envs(&info.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &info.working_directory {
            command.current_dir(dir);
        }

        tracing::debug!(command = %info.display(), "launching process");
        METRICS.inc_processes_spawned();

        let child = command.spawn().map_err(|source| ScmError::Launch {
            command: info.display(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(info.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!(
                    command = %info.display(),
                    timeout_secs = info.timeout.as_secs(),
                    "process timed out, killed"
                );
                ScmError::Timeout {
                    command: info.display(),
                    timeout_secs: info.timeout.as_secs(),
                }
            })??;

        let duration_ms = start.elapsed().as_millis() as u64;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_builder() {
        let mut builder = ProcessArgumentBuilder::new();
        builder
            .add("log")
            .add_if(true, "--xml")
            .add_if(false, "--quiet")
            .add_pair("--username", Some("alice"))
            .add_pair("--password", None)
            .add_pair("--message", Some(""))
            .add_joined("-Y", Some("admin,secret"));
        assert_eq!(
            builder.build(),
            vec!["log", "--xml", "--username", "alice", "-Yadmin,secret"]
        );
    }

    #[test]
    fn test_display_masks_secrets() {
        let info = ProcessInfo::new(
            "svn",
            vec![
                "--password".to_string(),
                "hunter2".to_string(),
                "-m".to_string(),
                "build label".to_string(),
            ],
        )
        .with_secret("hunter2");
        assert_eq!(info.display(), "svn --password ****** -m \"build label\"");
    }

    #[test]
    fn test_empty_secret_is_ignored() {
        let info = ProcessInfo::new("cvs", vec!["update".to_string()]).with_secret("");
        assert!(info.secrets.is_empty());
        assert_eq!(info.display(), "cvs update");
    }

    #[tokio::test]
    async fn test_execute_captures_stdout() {
        let info = ProcessInfo::new("echo", vec!["hello".to_string()]);
        let output = CommandExecutor.execute(&info).await.expect("execute failed");
        assert!(output.succeeded());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_reports_exit_code() {
        let info = ProcessInfo::new("false", Vec::new());
        let output = CommandExecutor.execute(&info).await.expect("execute failed");
        assert!(!output.succeeded());
        assert_ne!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_timeout_kills_child() {
        let info = ProcessInfo::new("sleep", vec!["5".to_string()])
            .with_timeout(Duration::from_millis(100));
        let err = CommandExecutor.execute(&info).await.unwrap_err();
        assert!(matches!(err, ScmError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_execute_missing_binary_is_launch_error() {
        let info = ProcessInfo::new("scmwatch-no-such-binary", Vec::new());
        let err = CommandExecutor.execute(&info).await.unwrap_err();
        assert!(matches!(err, ScmError::Launch { .. }), "got {err:?}");
    }
}
