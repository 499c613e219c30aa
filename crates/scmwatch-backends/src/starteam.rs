//! StarTeam through `stcmd`.
//!
//! ```text
//! stcmd hist -nologo -x -is -p <user:pwd@host:port/project/view/folder>
//! stcmd co -nologo -x -is -q -p <url> -fp <dir> (-f NCO | -o)
//! stcmd label -nologo -x -p <url> -nl <label> -b
//! ```
//!
//! `hist` prints one `Folder:` section per folder, one `History for:` section
//! per file, and revisions separated by dashed lines.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    strip_folder_root, within_window, Checkout, HistoryParser, IntegrationResult, Modification,
    ModificationKind, ProcessArgumentBuilder, ProcessExecutor, ProcessInfo, ProcessRunner,
    RecordPolicy, Result, ScmError, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "starteam";

pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%y %I:%M:%S %p";

static FOLDER: OnceLock<Regex> = OnceLock::new();
static FILE: OnceLock<Regex> = OnceLock::new();
static SEPARATOR: OnceLock<Regex> = OnceLock::new();
static FILE_END: OnceLock<Regex> = OnceLock::new();
static REVISION: OnceLock<Regex> = OnceLock::new();

fn folder_regex() -> &'static Regex {
    FOLDER.get_or_init(|| {
        Regex::new(r"(?m)^Folder: (?P<name>.+?)\s+\(working dir: (?P<dir>[^)]*)\)\s*$")
            .expect("folder regex compiles")
    })
}

fn file_regex() -> &'static Regex {
    FILE.get_or_init(|| {
        Regex::new(r"(?m)^History for: (?P<file>.+?)\s*$").expect("file regex compiles")
    })
}

fn separator_regex() -> &'static Regex {
    SEPARATOR.get_or_init(|| Regex::new(r"(?m)^-{28}\s*$").expect("separator regex compiles"))
}

fn file_end_regex() -> &'static Regex {
    FILE_END.get_or_init(|| Regex::new(r"(?m)^={77}\s*$").expect("file end regex compiles"))
}

fn revision_regex() -> &'static Regex {
    REVISION.get_or_init(|| {
        Regex::new(
            r"(?s)^\s*Revision: (?P<rev>\S+) View: (?P<view>.+?) Branch Revision: (?P<branch>\S+)\s*\r?\nAuthor: (?P<author>.+?) Date: (?P<date>[^\r\n]+?)\s*\r?\n(?P<comment>.*)$",
        )
        .expect("revision regex compiles")
    })
}

/// Splits `text` at every match of `header`, yielding each match with the
/// text up to the next one.
fn sections<'t>(header: &Regex, text: &'t str) -> Vec<(regex::Captures<'t>, &'t str)> {
    let captures: Vec<regex::Captures<'t>> = header.captures_iter(text).collect();
    let ends: Vec<usize> = captures
        .iter()
        .skip(1)
        .filter_map(|caps| caps.get(0))
        .map(|m| m.start())
        .chain(std::iter::once(text.len()))
        .collect();
    captures
        .into_iter()
        .zip(ends)
        .map(|(caps, end)| {
            let start = caps.get(0).map_or(0, |m| m.end());
            (caps, &text[start..end])
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct StarTeamHistoryParser {
    date_format: String,
    policy: RecordPolicy,
}

impl Default for StarTeamHistoryParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT, RecordPolicy::default())
    }
}

impl StarTeamHistoryParser {
    pub fn new(date_format: impl Into<String>, policy: RecordPolicy) -> Self {
        Self {
            date_format: date_format.into(),
            policy,
        }
    }

    /// The date column may end in a time-zone abbreviation chrono cannot read.
    fn parse_date(&self, raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, &self.date_format)
            .ok()
            .or_else(|| {
                let (without_zone, _) = raw.rsplit_once(' ')?;
                NaiveDateTime::parse_from_str(without_zone, &self.date_format).ok()
            })
            .map(|naive| naive.and_utc())
    }

    fn parse_revision(&self, folder: &str, file: &str, block: &str) -> Result<Option<Modification>> {
        if block.trim().is_empty() {
            return Ok(None);
        }
        let caps = revision_regex()
            .captures(block)
            .ok_or_else(|| ScmError::record(BACKEND, "unrecognized revision block", block))?;
        let date = &caps["date"];
        let modified_time = self
            .parse_date(date)
            .ok_or_else(|| ScmError::record(BACKEND, format!("bad date {date:?}"), block))?;
        let revision = &caps["rev"];
        let kind = if revision == "1" {
            ModificationKind::Added
        } else {
            ModificationKind::Modified
        };
        Ok(Some(
            Modification::new(kind, folder, file, modified_time)
                .with_user(caps["author"].trim())
                .with_version(revision)
                .with_change_number(&caps["branch"])
                .with_comment(caps["comment"].trim()),
        ))
    }
}

impl HistoryParser for StarTeamHistoryParser {
    /// Output without any `Folder:` section is an empty history.
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        let mut modifications = Vec::new();
        for (folder_caps, folder_text) in sections(folder_regex(), raw) {
            let folder = folder_caps["dir"].trim();
            for (file_caps, file_text) in sections(file_regex(), folder_text) {
                let file = file_caps["file"].trim();
                let file_text = file_end_regex()
                    .find(file_text)
                    .map_or(file_text, |end| &file_text[..end.start()]);
                // The first chunk holds the file description, not a revision.
                for block in separator_regex().split(file_text).skip(1) {
                    let parsed = self.policy.handle(self.parse_revision(folder, file, block))?;
                    if let Some(Some(modification)) = parsed {
                        if within_window(modification.modified_time, from, to) {
                            modifications.push(modification);
                        }
                    }
                }
            }
        }
        Ok(modifications)
    }
}

fn default_executable() -> String {
    "stcmd".to_string()
}

fn default_port() -> u16 {
    49201
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StarTeamConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub project: String,
    pub view: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// chrono format of the `Date:` column.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Root of the working folders as printed in `(working dir: ...)`.
    #[serde(default)]
    pub path_root: Option<String>,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl StarTeamConfig {
    pub fn new(host: impl Into<String>, project: impl Into<String>, view: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            host: host.into(),
            port: default_port(),
            project: project.into(),
            view: view.into(),
            folder: String::new(),
            username: String::new(),
            password: String::new(),
            date_format: default_date_format(),
            path_root: None,
            settings: ConnectorSettings::default(),
        }
    }

    pub fn url(&self) -> String {
        let mut url = format!(
            "{}:{}@{}:{}/{}/{}",
            self.username, self.password, self.host, self.port, self.project, self.view
        );
        let folder = self.folder.trim_matches('/');
        if !folder.is_empty() {
            url.push('/');
            url.push_str(folder);
        }
        url
    }
}

pub struct StarTeamConnector {
    config: StarTeamConfig,
    runner: ProcessRunner,
    parser: StarTeamHistoryParser,
}

impl StarTeamConnector {
    pub fn new(config: StarTeamConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.host.is_empty() || config.project.is_empty() || config.view.is_empty() {
            return Err(ScmError::Config(
                "starteam: host, project and view must be set".to_string(),
            ));
        }
        let runner = config.settings.runner(executor);
        let parser =
            StarTeamHistoryParser::new(config.date_format.clone(), config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
        })
    }

    fn process(&self, command: &str, extra: &ProcessArgumentBuilder) -> ProcessInfo {
        let mut args = ProcessArgumentBuilder::new();
        args.add(command)
            .add("-nologo")
            .add("-x")
            .add("-p")
            .add(self.config.url());
        let mut args = args.build();
        args.extend(extra.build());
        self.config
            .settings
            .process(&self.config.executable, args)
            .with_secret(self.config.password.as_str())
    }
}

#[async_trait]
impl SourceControl for StarTeamConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        let mut extra = ProcessArgumentBuilder::new();
        extra.add("-is");
        let output = self.runner.run(&self.process("hist", &extra)).await?;

        let mut modifications = self
            .parser
            .parse(&output.stdout, from.start_time, to.start_time)?;
        if let Some(root) = &self.config.path_root {
            strip_folder_root(&mut modifications, root);
        }
        obs::emit_changes_detected(BACKEND, modifications.len());
        Ok(modifications)
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.auto_get_source {
            tracing::debug!(backend = BACKEND, "auto_get_source disabled, skipping checkout");
            return Ok(());
        }
        let dir = self.config.settings.working_dir(result);
        let checkout = Checkout::decide_dir(&dir, self.config.settings.force_full_checkout);
        ensure_dir(&dir).await?;

        let mut extra = ProcessArgumentBuilder::new();
        extra.add("-is").add("-q").add("-fp").add(dir.to_string_lossy());
        match checkout {
            Checkout::Incremental => extra.add("-f").add("NCO"),
            Checkout::Full => extra.add("-o"),
        };
        self.runner.run(&self.process("co", &extra)).await?;
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
        let mut extra = ProcessArgumentBuilder::new();
        extra.add("-nl").add(&result.label).add("-b");
        self.runner.run(&self.process("label", &extra)).await?;
        obs::emit_label_applied(BACKEND, &result.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HISTORY: &str = "\
Folder: src  (working dir: C:\\work\\proj\\src)
History for: Main.java
Description: entry point
Locked by:
Status: Current
----------------------------
Revision: 3 View: main Branch Revision: 1.2
Author: Alice Smith Date: 1/03/20 10:15:00 AM CST
Tighten argument parsing
and update usage text
----------------------------
Revision: 1 View: main Branch Revision: 1.0
Author: Bob Date: 12/20/19 9:00:00 AM CST
Initial revision
=============================================================================
Folder: util  (working dir: C:\\work\\proj\\src\\util)
History for: Strings.java
Description:
Locked by:
Status: Current
----------------------------
Revision: 1 View: main Branch Revision: 1.0
Author: Carol Date: 1/02/20 4:30:00 PM
Added helpers
=============================================================================
";

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 31, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_sections_and_window() {
        let (from, to) = window();
        let mods = StarTeamHistoryParser::default().parse(HISTORY, from, to).unwrap();
        assert_eq!(mods.len(), 2);

        assert_eq!(mods[0].file_name, "Main.java");
        assert_eq!(mods[0].folder_name, "C:/work/proj/src");
        assert_eq!(mods[0].user_name, "Alice Smith");
        assert_eq!(mods[0].kind, ModificationKind::Modified);
        assert_eq!(mods[0].version, "3");
        assert_eq!(
            mods[0].comment.as_deref(),
            Some("Tighten argument parsing\nand update usage text")
        );
        assert_eq!(
            mods[0].modified_time,
            Utc.with_ymd_and_hms(2020, 1, 3, 10, 15, 0).unwrap()
        );

        assert_eq!(mods[1].file_name, "Strings.java");
        assert_eq!(mods[1].folder_name, "C:/work/proj/src/util");
        assert_eq!(mods[1].kind, ModificationKind::Added);
        assert!(mods.iter().all(|m| within_window(m.modified_time, from, to)));
    }

    #[test]
    fn test_no_match_is_empty_history() {
        let (from, to) = window();
        let mods = StarTeamHistoryParser::default()
            .parse("StarTeam 2009 command line interface\n", from, to)
            .unwrap();
        assert!(mods.is_empty());
    }

    #[test]
    fn test_custom_date_format() {
        let raw = HISTORY
            .replace("1/03/20 10:15:00 AM CST", "2020-01-03 10:15:00")
            .replace("12/20/19 9:00:00 AM CST", "2019-12-20 09:00:00")
            .replace("1/02/20 4:30:00 PM", "2020-01-02 16:30:00");
        let (from, to) = window();
        let mods = StarTeamHistoryParser::new("%Y-%m-%d %H:%M:%S", RecordPolicy::Fail)
            .parse(&raw, from, to)
            .unwrap();
        assert_eq!(mods.len(), 2);
    }

    #[test]
    fn test_bad_date_fails_unless_skipping() {
        let raw = HISTORY.replace("1/02/20 4:30:00 PM", "someday");
        let (from, to) = window();
        assert!(matches!(
            StarTeamHistoryParser::default().parse(&raw, from, to),
            Err(ScmError::Record { .. })
        ));
        let mods = StarTeamHistoryParser::new(DEFAULT_DATE_FORMAT, RecordPolicy::Skip)
            .parse(&raw, from, to)
            .unwrap();
        assert_eq!(mods.len(), 1);
    }

    #[test]
    fn test_url_with_folder() {
        let mut config = StarTeamConfig::new("st.example.org", "Proj", "main");
        config.username = "ci".to_string();
        config.password = "pw".to_string();
        config.folder = "/src/".to_string();
        assert_eq!(config.url(), "ci:pw@st.example.org:49201/Proj/main/src");
    }
}
