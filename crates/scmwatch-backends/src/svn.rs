//! Subversion: `svn log --xml --verbose` history, update/checkout and tag
//! copies.
//!
//! ```text
//! svn log <url> -r "{<from>}:{<to>}" --verbose --xml --non-interactive --no-auth-cache [creds]
//! svn update <dir> --non-interactive --no-auth-cache [creds]
//! svn checkout <url> <dir> --non-interactive --no-auth-cache [creds]
//! svn copy -m "<message>" <url> <tag_base>/<label> [-r <rev>] --non-interactive --no-auth-cache [creds]
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    last_change_number, strip_folder_root, within_window, Checkout, HistoryParser,
    IntegrationResult, IntegrationStatus, Modification, ModificationKind, ProcessArgumentBuilder,
    ProcessExecutor, ProcessRunner, RecordPolicy, Result, ScmError, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "svn";

const WORKING_COPY_MARKER: &str = ".svn";

/// Parses `svn log --xml --verbose`, one modification per changed path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvnHistoryParser {
    policy: RecordPolicy,
    /// The first entry is reported even when it falls outside the window.
    status_unknown: bool,
}

impl SvnHistoryParser {
    pub fn new(policy: RecordPolicy) -> Self {
        Self {
            policy,
            status_unknown: false,
        }
    }

    pub fn with_status_unknown(mut self, status_unknown: bool) -> Self {
        self.status_unknown = status_unknown;
        self
    }
}

impl HistoryParser for SvnHistoryParser {
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        let doc = roxmltree::Document::parse(raw.trim())
            .map_err(|e| ScmError::parse(BACKEND, format!("invalid log XML: {e}"), raw))?;
        let log = doc.root_element();
        if !log.has_tag_name("log") {
            return Err(ScmError::parse(
                BACKEND,
                format!("expected <log> root, found <{}>", log.tag_name().name()),
                raw,
            ));
        }

        let mut modifications = Vec::new();
        for (index, entry) in log
            .children()
            .filter(|n| n.has_tag_name("logentry"))
            .enumerate()
        {
            let Some(entry_mods) = self.policy.handle(parse_entry(entry))? else {
                continue;
            };
            let bypass = index == 0 && self.status_unknown;
            if let Some(first) = entry_mods.first() {
                if !bypass && !within_window(first.modified_time, from, to) {
                    continue;
                }
            }
            modifications.extend(entry_mods);
        }
        Ok(modifications)
    }
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .and_then(|n| n.text())
}

fn parse_entry(entry: roxmltree::Node<'_, '_>) -> Result<Vec<Modification>> {
    let fragment = || format!("<logentry revision=\"{}\">", entry.attribute("revision").unwrap_or("?"));

    let revision = entry
        .attribute("revision")
        .ok_or_else(|| ScmError::record(BACKEND, "logentry without revision", fragment()))?;
    let date = child_text(entry, "date")
        .ok_or_else(|| ScmError::record(BACKEND, "logentry without date", fragment()))?;
    let modified_time = DateTime::parse_from_rfc3339(date.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ScmError::record(BACKEND, format!("bad date {date:?}: {e}"), fragment()))?;
    // Anonymous commits carry no author.
    let author = child_text(entry, "author").unwrap_or_default();
    let message = child_text(entry, "msg").unwrap_or_default();

    let Some(paths) = entry.children().find(|n| n.has_tag_name("paths")) else {
        return Ok(Vec::new());
    };
    Ok(paths
        .children()
        .filter(|n| n.has_tag_name("path"))
        .map(|path| {
            let kind = match path.attribute("action") {
                Some("A") => ModificationKind::Added,
                Some("M") => ModificationKind::Modified,
                Some("D") => ModificationKind::Deleted,
                Some("R") => ModificationKind::Replaced,
                _ => ModificationKind::Unknown,
            };
            Modification::from_path(kind, path.text().unwrap_or_default().trim(), modified_time)
                .with_user(author)
                .with_version(revision)
                .with_change_number(revision)
                .with_comment(message)
        })
        .collect())
}

fn default_executable() -> String {
    "svn".to_string()
}

fn default_tag_message() -> String {
    "scmwatch build {label}".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SvnConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub trunk_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Where `label` copies the trunk to, e.g. `https://svn.example.org/repo/tags`.
    #[serde(default)]
    pub tag_base_url: Option<String>,
    /// Tag the revision the build saw rather than HEAD.
    #[serde(default = "default_true")]
    pub tag_built_revision: bool,
    #[serde(default = "default_tag_message")]
    pub tag_message: String,
    /// Repository path of `trunk_url` as it appears in log paths, e.g. `/trunk`.
    #[serde(default)]
    pub repository_path: Option<String>,
    #[serde(default)]
    pub cleanup_first: bool,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

fn default_true() -> bool {
    true
}

impl SvnConfig {
    pub fn new(trunk_url: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            trunk_url: trunk_url.into(),
            username: None,
            password: None,
            tag_base_url: None,
            tag_built_revision: true,
            tag_message: default_tag_message(),
            repository_path: None,
            cleanup_first: false,
            settings: ConnectorSettings::default(),
        }
    }
}

pub struct SvnConnector {
    config: SvnConfig,
    runner: ProcessRunner,
}

impl SvnConnector {
    pub fn new(config: SvnConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.trunk_url.trim().is_empty() {
            return Err(ScmError::Config("svn: trunk_url must be set".to_string()));
        }
        let runner = config.settings.runner(executor);
        Ok(Self { config, runner })
    }

    fn common_args(&self, args: &mut ProcessArgumentBuilder) {
        args.add("--non-interactive")
            .add("--no-auth-cache")
            .add_pair("--username", self.config.username.as_deref())
            .add_pair("--password", self.config.password.as_deref());
    }

    async fn run(&self, args: ProcessArgumentBuilder) -> Result<String> {
        let mut info = self.config.settings.process(&self.config.executable, args.build());
        if let Some(password) = &self.config.password {
            info = info.with_secret(password);
        }
        Ok(self.runner.run(&info).await?.stdout)
    }
}

#[async_trait]
impl SourceControl for SvnConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        let mut args = ProcessArgumentBuilder::new();
        args.add("log")
            .add(&self.config.trunk_url)
            .add("-r")
            .add(format!(
                "{{{}}}:{{{}}}",
                from.start_time.format("%Y-%m-%dT%H:%M:%SZ"),
                to.start_time.format("%Y-%m-%dT%H:%M:%SZ")
            ))
            .add("--verbose")
            .add("--xml");
        self.common_args(&mut args);
        let stdout = self.run(args).await?;

        let parser = SvnHistoryParser::new(self.config.settings.record_policy)
            .with_status_unknown(to.last_integration_status == IntegrationStatus::Unknown);
        let mut modifications = parser.parse(&stdout, from.start_time, to.start_time)?;
        if let Some(root) = &self.config.repository_path {
            strip_folder_root(&mut modifications, root);
        }
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
        let target = dir.to_string_lossy().into_owned();

        match checkout {
            Checkout::Incremental => {
                if self.config.cleanup_first {
                    let mut args = ProcessArgumentBuilder::new();
                    args.add("cleanup").add(&target);
                    self.run(args).await?;
                }
                let mut args = ProcessArgumentBuilder::new();
                args.add("update").add(&target);
                self.common_args(&mut args);
                self.run(args).await?;
            }
            Checkout::Full => {
                ensure_dir(&dir).await?;
                let mut args = ProcessArgumentBuilder::new();
                args.add("checkout").add(&self.config.trunk_url).add(&target);
                self.common_args(&mut args);
                self.run(args).await?;
            }
        }
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
        let Some(tag_base) = self.config.tag_base_url.as_deref() else {
            return Err(ScmError::Config(
                "svn: tag_base_url must be set to label builds".to_string(),
            ));
        };

        let revision = if self.config.tag_built_revision {
            last_change_number(&result.modifications)
        } else {
            None
        };
        let mut args = ProcessArgumentBuilder::new();
        args.add("copy")
            .add("-m")
            .add(self.config.tag_message.replace("{label}", &result.label))
            .add(&self.config.trunk_url)
            .add(format!("{}/{}", tag_base.trim_end_matches('/'), result.label))
            .add_pair("-r", revision.as_deref());
        self.common_args(&mut args);
        self.run(args).await?;
        obs::emit_label_applied(BACKEND, &result.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, day, hour, 0, 0).unwrap()
    }

    const TWO_ENTRIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<log>
<logentry revision="40">
<author>carol</author>
<date>2019-12-30T09:00:00.000000Z</date>
<paths>
<path kind="file" action="M">/trunk/old.c</path>
</paths>
<msg>old work</msg>
</logentry>
<logentry revision="41">
<author>dave</author>
<date>2020-01-02T11:00:00.000000Z</date>
<paths>
<path kind="file" action="R">/trunk/new.c</path>
</paths>
<msg>replace</msg>
</logentry>
</log>"#;

    #[test]
    fn test_window_applied() {
        let mods = SvnHistoryParser::default()
            .parse(TWO_ENTRIES, at(1, 0), at(3, 0))
            .unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].kind, ModificationKind::Replaced);
        assert_eq!(mods[0].change_number.as_deref(), Some("41"));
        assert!(mods
            .iter()
            .all(|m| within_window(m.modified_time, at(1, 0), at(3, 0))));
    }

    #[test]
    fn test_status_unknown_bypasses_window_for_first_entry_only() {
        let parser = SvnHistoryParser::default().with_status_unknown(true);
        let mods = parser.parse(TWO_ENTRIES, at(5, 0), at(6, 0)).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].file_name, "old.c");
    }

    #[test]
    fn test_missing_log_root_is_structural_error() {
        let err = SvnHistoryParser::default()
            .parse("<info><entry/></info>", at(1, 0), at(2, 0))
            .unwrap_err();
        assert!(matches!(err, ScmError::Parse { backend: "svn", .. }));

        let err = SvnHistoryParser::default()
            .parse("svn: E170013: Unable to connect", at(1, 0), at(2, 0))
            .unwrap_err();
        assert!(err.raw_payload().unwrap().contains("E170013"));
    }

    #[test]
    fn test_anonymous_commit_and_empty_message() {
        let raw = r#"<log><logentry revision="7"><date>2020-01-02T00:00:00Z</date>
<paths><path action="A">/trunk/a.txt</path></paths><msg></msg></logentry></log>"#;
        let mods = SvnHistoryParser::default().parse(raw, at(1, 0), at(3, 0)).unwrap();
        assert_eq!(mods[0].user_name, "");
        assert_eq!(mods[0].comment, None);
    }

    #[test]
    fn test_bad_date_policy() {
        let raw = r#"<log>
<logentry revision="8"><author>x</author><date>not a date</date>
<paths><path action="M">/trunk/a.txt</path></paths></logentry>
<logentry revision="9"><author>y</author><date>2020-01-02T00:00:00Z</date>
<paths><path action="M">/trunk/b.txt</path></paths></logentry>
</log>"#;
        assert!(matches!(
            SvnHistoryParser::default().parse(raw, at(1, 0), at(3, 0)),
            Err(ScmError::Record { .. })
        ));
        let mods = SvnHistoryParser::new(RecordPolicy::Skip)
            .parse(raw, at(1, 0), at(3, 0))
            .unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].version, "9");
    }
}
