//! Visual SourceSafe through `ss.exe`.
//!
//! ```text
//! ss history <project> -R -Vd<to>~<from> -I-Y [-Y<user>,<password>]
//! ss get <project> -R -I-Y -W -GL<dir> -GTM [-GWR] [-Y<user>,<password>]
//! ss label <project> -L<label> -I-Y [-Y<user>,<password>]
//! ```
//!
//! `SSDIR` points the client at the database when `ss_dir` is configured.

mod locale;
mod parser;

pub use locale::VssLocale;
pub use parser::{VssEntry, VssHistoryParser};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    strip_folder_root, Checkout, HistoryParser, IntegrationResult, Modification,
    ProcessArgumentBuilder, ProcessExecutor, ProcessInfo, ProcessRunner, Result, ScmError,
    SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "vss";

const WORKING_COPY_MARKER: &str = "vssver2.scc";

fn default_executable() -> String {
    "ss".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VssConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    /// e.g. `$/Product/Main`
    pub project: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Directory holding `srcsafe.ini`; exported as `SSDIR`.
    #[serde(default)]
    pub ss_dir: Option<String>,
    #[serde(default)]
    pub locale: VssLocale,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl VssConfig {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            project: project.into(),
            username: None,
            password: None,
            ss_dir: None,
            locale: VssLocale::default(),
            settings: ConnectorSettings::default(),
        }
    }
}

pub struct VssConnector {
    config: VssConfig,
    runner: ProcessRunner,
    parser: VssHistoryParser,
}

impl VssConnector {
    pub fn new(config: VssConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if !config.project.starts_with('$') {
            return Err(ScmError::Config(format!(
                "vss: project must be a database path starting with '$', got {:?}",
                config.project
            )));
        }
        let runner = config.settings.runner(executor);
        let parser = VssHistoryParser::new(config.locale.clone(), config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
        })
    }

    fn process(&self, mut args: ProcessArgumentBuilder) -> ProcessInfo {
        args.add("-I-Y");
        if let Some(user) = &self.config.username {
            let password = self.config.password.as_deref().unwrap_or_default();
            args.add(format!("-Y{user},{password}"));
        }
        let mut info = self.config.settings.process(&self.config.executable, args.build());
        if let Some(password) = &self.config.password {
            info = info.with_secret(password);
        }
        if let Some(ss_dir) = &self.config.ss_dir {
            info = info.with_env("SSDIR", ss_dir);
        }
        info
    }
}

#[async_trait]
impl SourceControl for VssConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        let locale = &self.config.locale;
        let mut args = ProcessArgumentBuilder::new();
        args.add("history").add(&self.config.project).add("-R").add(format!(
            "-Vd{}~{}",
            locale.format_command_date(to.start_time),
            locale.format_command_date(from.start_time)
        ));
        let output = self.runner.run(&self.process(args)).await?;

        let mut modifications = self
            .parser
            .parse(&output.stdout, from.start_time, to.start_time)?;
        strip_folder_root(&mut modifications, &self.config.project);
        obs::emit_changes_detected(BACKEND, modifications.len());
        Ok(modifications)
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.auto_get_source {
            tracing::debug!(backend = BACKEND, "auto_get_source disabled, skipping get");
            return Ok(());
        }
        let dir = self.config.settings.working_dir(result);
        let checkout = Checkout::decide(
            &dir,
            Some(WORKING_COPY_MARKER),
            self.config.settings.force_full_checkout,
        );
        ensure_dir(&dir).await?;

        let mut args = ProcessArgumentBuilder::new();
        args.add("get")
            .add(&self.config.project)
            .add("-R")
            .add("-W")
            .add(format!("-GL{}", dir.display()))
            .add("-GTM")
            .add_if(checkout.is_full(), "-GWR");
        self.runner.run(&self.process(args)).await?;
        obs::emit_working_copy_materialized(BACKEND, checkout.is_full());
        Ok(())
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn label(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.label_on_success {
            obs::emit_label_skipped(BACKEND, "label_on_success disabled");
            return Ok(());
        }
        if !result.succeeded() {
            obs::emit_label_skipped(BACKEND, "integration did not succeed");
            return Ok(());
        }
        let mut args = ProcessArgumentBuilder::new();
        args.add("label")
            .add(&self.config.project)
            .add(format!("-L{}", result.label));
        self.runner.run(&self.process(args)).await?;
        obs::emit_label_applied(BACKEND, &result.label);
        Ok(())
    }
}
