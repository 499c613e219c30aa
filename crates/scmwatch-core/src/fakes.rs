//! In-memory fakes for the process layer (testing only)
//!
//! `ScriptedExecutor` records every command line it receives and replays
//! queued outputs in order, so connectors can be exercised without the real
//! version-control clients installed.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Result, ScmError};
use crate::process::{ProcessExecutor, ProcessInfo, ProcessOutput};

/// Replays queued outputs; an empty queue yields a successful empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<Result<ProcessOutput>>>,
    invocations: Mutex<Vec<ProcessInfo>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_output(&self, output: ProcessOutput) {
        self.responses.lock().unwrap().push_back(Ok(output));
    }

    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(ProcessOutput::success(stdout));
    }

    pub fn push_error(&self, error: ScmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Every command executed so far, in order.
    pub fn invocations(&self) -> Vec<ProcessInfo> {
        self.invocations.lock().unwrap().clone()
    }

    /// The `i`-th command line as `executable arg arg ...`, unmasked.
    pub fn command_line(&self, i: usize) -> Option<String> {
        self.invocations.lock().unwrap().get(i).map(|info| {
            std::iter::once(info.executable.as_str())
                .chain(info.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    /// Whether any recorded invocation contains `arg` among its arguments.
    pub fn ran_with(&self, arg: &str) -> bool {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .any(|info| info.args.iter().any(|a| a == arg))
    }
}

#[async_trait]
impl ProcessExecutor for ScriptedExecutor {
    async fn execute(&self, info: &ProcessInfo) -> Result<ProcessOutput> {
        self.invocations.lock().unwrap().push(info.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ProcessOutput::default()))
    }
}
