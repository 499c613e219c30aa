//! CVS: `cvs rlog` history, `update`/`checkout` working copies and `tag`
//! labels.
//!
//! Command lines:
//!
//! ```text
//! cvs -d <root> -q rlog -N "-d<from> GMT<<to> GMT" (-r<branch> | -b) [-w<logins>] <module>
//! cvs -d <root> -q update -d -P [-C] (-r <branch> | -A)        # in the working copy
//! cvs -d <root> -q checkout -R -P [-r <branch>] -d <dir> <module>  # in its parent
//! cvs -d <root> -q tag <label>                                  # in the working copy
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    strip_folder_root, Checkout, HistoryParser, IntegrationResult, Modification, ModificationKind,
    ProcessArgumentBuilder, ProcessExecutor, ProcessInfo, ProcessRunner, RecordPolicy, Result,
    ScmError, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "cvs";

const WORKING_COPY_MARKER: &str = "CVS";

fn is_rule(line: &str, ch: char, len: usize) -> bool {
    let line = line.trim_end();
    line.len() == len && line.chars().all(|c| c == ch)
}

fn is_record_end(line: &str) -> bool {
    is_rule(line, '=', 77)
}

fn is_revision_separator(line: &str) -> bool {
    is_rule(line, '-', 28)
}

/// Parses `cvs rlog` / `cvs log` output.
///
/// Window filtering is left to the `-d` range on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct CvsHistoryParser {
    policy: RecordPolicy,
}

impl CvsHistoryParser {
    pub fn new(policy: RecordPolicy) -> Self {
        Self { policy }
    }
}

impl HistoryParser for CvsHistoryParser {
    fn parse(&self, raw: &str, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<Modification>> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut modifications = Vec::new();
        let mut files_seen = 0usize;
        for record in split_records(raw) {
            let Some(archive) = archive_path(&record) else {
                continue;
            };
            files_seen += 1;
            let (folder, file) = archive_location(archive);
            for block in revision_blocks(&record) {
                let parsed = self.policy.handle(parse_revision(&folder, &file, &block))?;
                if let Some(Some(modification)) = parsed {
                    modifications.push(modification);
                }
            }
        }

        if files_seen == 0 {
            return Err(ScmError::parse(BACKEND, "no 'RCS file:' header found", raw));
        }
        Ok(modifications)
    }
}

fn split_records(raw: &str) -> Vec<Vec<&str>> {
    let mut records = Vec::new();
    let mut current = Vec::new();
    for line in raw.lines() {
        if is_record_end(line) {
            records.push(std::mem::take(&mut current));
        } else {
            current.push(line);
        }
    }
    if current.iter().any(|line| !line.trim().is_empty()) {
        records.push(current);
    }
    records
}

fn archive_path<'a>(record: &[&'a str]) -> Option<&'a str> {
    record
        .iter()
        .find_map(|line| line.strip_prefix("RCS file:"))
        .map(str::trim)
}

/// Folder and file name of an RCS archive path, without `,v` or `Attic`.
fn archive_location(archive: &str) -> (String, String) {
    let archive = archive.strip_suffix(",v").unwrap_or(archive);
    let (folder, file) = scmwatch_core::split_path(archive);
    let folder = match folder.rsplit_once('/') {
        Some((parent, "Attic")) => parent.to_string(),
        None if folder == "Attic" => String::new(),
        _ => folder,
    };
    (folder, file)
}

fn revision_blocks<'a>(record: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in record {
        if is_revision_separator(line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Vec::new());
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

/// `Ok(None)` for revisions that are not reported (a dead `1.1`).
fn parse_revision(folder: &str, file: &str, block: &[&str]) -> Result<Option<Modification>> {
    let fragment = || block.join("\n");

    let revision = block
        .first()
        .and_then(|line| line.strip_prefix("revision "))
        .and_then(|rest| rest.split_whitespace().next())
        .ok_or_else(|| ScmError::record(BACKEND, "missing revision line", fragment()))?;

    let date_index = block
        .iter()
        .position(|line| line.starts_with("date:"))
        .ok_or_else(|| ScmError::record(BACKEND, "missing date line", fragment()))?;
    let fields = date_line_fields(block[date_index]);

    let date = fields
        .get("date")
        .ok_or_else(|| ScmError::record(BACKEND, "missing date field", fragment()))?;
    let modified_time = parse_date(date)
        .ok_or_else(|| ScmError::record(BACKEND, format!("bad date {date:?}"), fragment()))?;

    let kind = if fields.get("state").is_some_and(|state| *state == "dead") {
        ModificationKind::Deleted
    } else if added_lines(fields.get("lines").copied()).unwrap_or(0) == 0 {
        ModificationKind::Added
    } else {
        ModificationKind::Modified
    };

    // A dead 1.1 is the trunk stub CVS creates when a file is added on a branch.
    if kind == ModificationKind::Deleted && revision == "1.1" {
        return Ok(None);
    }

    let mut comment_start = date_index + 1;
    if block
        .get(comment_start)
        .is_some_and(|line| line.starts_with("branches:"))
    {
        comment_start += 1;
    }
    let comment = block[comment_start..].join("\n").trim_end().to_string();

    let mut modification = Modification::new(kind, folder, file, modified_time)
        .with_user(fields.get("author").copied().unwrap_or_default())
        .with_version(revision)
        .with_comment(comment);
    if let Some(commit_id) = fields.get("commitid") {
        modification = modification.with_change_number(*commit_id);
    }
    Ok(Some(modification))
}

fn date_line_fields(line: &str) -> HashMap<&str, &str> {
    line.split(';')
        .filter_map(|field| field.trim().split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

fn added_lines(lines: Option<&str>) -> Option<u64> {
    lines?
        .split_whitespace()
        .next()?
        .trim_start_matches('+')
        .parse()
        .ok()
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| {
            DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z").map(|dt| dt.with_timezone(&Utc))
        })
        .ok()
}

fn default_executable() -> String {
    "cvs".to_string()
}

fn default_label_prefix() -> String {
    "ver-".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CvsConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    /// e.g. `:pserver:anonymous@cvs.example.org:/cvsroot`
    pub cvsroot: String,
    pub module: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Repository root as it appears in `RCS file:` lines. Defaults to the
    /// path part of `cvsroot`.
    #[serde(default)]
    pub repository_root: Option<String>,
    /// Only report commits by these logins (`-w`).
    #[serde(default)]
    pub restrict_logins: Option<String>,
    #[serde(default)]
    pub cvs_rsh: Option<String>,
    #[serde(default)]
    pub home_directory: Option<String>,
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,
    /// Discard local modifications on update (`-C`).
    #[serde(default)]
    pub clean_copy: bool,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl CvsConfig {
    pub fn new(cvsroot: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            cvsroot: cvsroot.into(),
            module: module.into(),
            branch: None,
            repository_root: None,
            restrict_logins: None,
            cvs_rsh: None,
            home_directory: None,
            label_prefix: default_label_prefix(),
            clean_copy: false,
            settings: ConnectorSettings::default(),
        }
    }

    pub fn repository_root(&self) -> String {
        if let Some(root) = &self.repository_root {
            return root.clone();
        }
        let after_host = self
            .cvsroot
            .rsplit_once('@')
            .map_or(self.cvsroot.as_str(), |(_, rest)| rest);
        after_host
            .find('/')
            .map_or_else(String::new, |i| after_host[i..].to_string())
    }
}

pub struct CvsConnector {
    config: CvsConfig,
    runner: ProcessRunner,
    parser: CvsHistoryParser,
}

impl CvsConnector {
    pub fn new(config: CvsConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.cvsroot.trim().is_empty() {
            return Err(ScmError::Config("cvs: cvsroot must be set".to_string()));
        }
        if config.module.trim().is_empty() {
            return Err(ScmError::Config("cvs: module must be set".to_string()));
        }
        let runner = config.settings.runner(executor);
        let parser = CvsHistoryParser::new(config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
        })
    }

    /// CVS tags must start with a letter and may not contain `.` or spaces.
    pub fn label_name(&self, label: &str) -> String {
        let name: String = format!("{}{}", self.config.label_prefix, label)
            .chars()
            .map(|c| if c == '.' || c.is_whitespace() { '_' } else { c })
            .collect();
        if name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            name
        } else {
            format!("ver-{name}")
        }
    }

    fn process(&self, args: Vec<String>) -> ProcessInfo {
        let mut info = self.config.settings.process(&self.config.executable, args);
        if let Some(home) = &self.config.home_directory {
            info = info.with_env("HOME", home);
        }
        if let Some(rsh) = &self.config.cvs_rsh {
            info = info.with_env("CVS_RSH", rsh);
        }
        info
    }

    fn base_args(&self) -> ProcessArgumentBuilder {
        let mut args = ProcessArgumentBuilder::new();
        args.add("-d").add(&self.config.cvsroot).add("-q");
        args
    }

    fn history_args(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<String> {
        let mut args = self.base_args();
        args.add("rlog").add("-N").add(format!(
            "-d{}<{}",
            from.format("%Y-%m-%d %H:%M:%S GMT"),
            to.format("%Y-%m-%d %H:%M:%S GMT")
        ));
        match self.config.branch.as_deref() {
            Some(branch) => args.add(format!("-r{branch}")),
            None => args.add("-b"),
        };
        args.add_joined("-w", self.config.restrict_logins.as_deref())
            .add(&self.config.module);
        args.build()
    }
}

#[async_trait]
impl SourceControl for CvsConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        let info = self.process(self.history_args(from.start_time, to.start_time));
        let output = self.runner.run(&info).await?;

        let mut modifications = self
            .parser
            .parse(&output.stdout, from.start_time, to.start_time)?;
        let module_root = format!("{}/{}", self.config.repository_root(), self.config.module);
        strip_folder_root(&mut modifications, &module_root);

        obs::emit_changes_detected(BACKEND, modifications.len());
        Ok(modifications)
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.auto_get_source {
            tracing::debug!(backend = BACKEND, "auto_get_source disabled, skipping update");
            return Ok(());
        }
        let dir = self.config.settings.working_dir(result);
        let checkout = Checkout::decide(
            &dir,
            Some(WORKING_COPY_MARKER),
            self.config.settings.force_full_checkout,
        );

        let info = match checkout {
            Checkout::Incremental => {
                let mut args = self.base_args();
                args.add("update").add("-d").add("-P");
                args.add_if(self.config.clean_copy, "-C");
                match self.config.branch.as_deref() {
                    Some(branch) => args.add("-r").add(branch),
                    None => args.add("-A"),
                };
                self.process(args.build()).in_directory(&dir)
            }
            Checkout::Full => {
                let (Some(parent), Some(name)) = (dir.parent(), dir.file_name()) else {
                    return Err(ScmError::Config(format!(
                        "cvs: cannot check out into {}",
                        dir.display()
                    )));
                };
                ensure_dir(parent).await?;
                let mut args = self.base_args();
                args.add("checkout").add("-R").add("-P");
                args.add_pair("-r", self.config.branch.as_deref())
                    .add("-d")
                    .add(name.to_string_lossy())
                    .add(&self.config.module);
                self.process(args.build()).in_directory(parent)
            }
        };

        self.runner.run(&info).await?;
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
        let label = self.label_name(&result.label);
        let mut args = self.base_args();
        args.add("tag").add(&label);
        let info = self
            .process(args.build())
            .in_directory(self.config.settings.working_dir(result));
        self.runner.run(&info).await?;
        obs::emit_label_applied(BACKEND, &label);
        Ok(())
    }
}
