//! ClearCase: `cleartool lshist` with a custom format, snapshot views and
//! label types.
//!
//! ```text
//! cleartool lshist -r -nco -since <dd-MMM-yyyy.HH:mm:ss> -fmt <format> [-branch brtype:<b>] <view>
//! cleartool update -force -overwrite <view>
//! cleartool mkview -snapshot -tag <view_name> <view>
//! cleartool mklbtype -c <comment> <label>[@<vob>]
//! cleartool mklabel -recurse <label> <view>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    strip_folder_root, within_window, Checkout, HistoryParser, IntegrationResult, Modification,
    ModificationKind, ProcessArgumentBuilder, ProcessExecutor, ProcessRunner, RecordPolicy, Result,
    ScmError, SourceControl,
};

use crate::settings::ConnectorSettings;

pub const BACKEND: &str = "clearcase";

pub const FIELD_DELIMITER: &str = "#~#~#~#~#~#~#~#~#~#~#~#~#~#~#~#~#~#~#~#~#~";
pub const END_OF_RECORD: &str = "@#@#@#@#@#@#@#@#@#@#@#@";

const FIELD_COUNT: usize = 8;
const VIEW_MARKER: &str = "view.dat";

/// The `-fmt` argument matching [`ClearCaseHistoryParser`]: user, date,
/// element, version, operation, labels, attributes, comment.
pub fn history_format() -> String {
    let d = FIELD_DELIMITER;
    format!("%u{d}%Nd{d}%En{d}%Vn{d}%o{d}!%l{d}!%a{d}%Nc{END_OF_RECORD}\\n")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearCaseHistoryParser {
    policy: RecordPolicy,
}

impl ClearCaseHistoryParser {
    pub fn new(policy: RecordPolicy) -> Self {
        Self { policy }
    }
}

impl HistoryParser for ClearCaseHistoryParser {
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        let mut modifications = Vec::new();
        let mut pending = String::new();

        // Comments may span lines; a record is complete once its marker shows up.
        for line in raw.lines() {
            if !pending.is_empty() {
                pending.push('\n');
            }
            pending.push_str(line);
            let Some(end) = pending.find(END_OF_RECORD) else {
                continue;
            };
            let record = std::mem::take(&mut pending);
            if let Some(Some(modification)) = self.policy.handle(parse_record(&record[..end]))? {
                if within_window(modification.modified_time, from, to) {
                    modifications.push(modification);
                }
            }
        }

        if !pending.trim().is_empty() {
            let truncated: Result<()> = Err(ScmError::record(
                BACKEND,
                "record without end-of-record marker",
                pending,
            ));
            self.policy.handle(truncated)?;
        }
        Ok(modifications)
    }
}

fn parse_record(record: &str) -> Result<Option<Modification>> {
    let fields: Vec<&str> = record.splitn(FIELD_COUNT, FIELD_DELIMITER).collect();
    if fields.len() < FIELD_COUNT {
        return Err(ScmError::record(
            BACKEND,
            format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
            record,
        ));
    }
    let [user, date, element, version, operation, _labels, _attributes, comment] =
        <[&str; FIELD_COUNT]>::try_from(fields).map_err(|_| {
            ScmError::record(BACKEND, "unexpected field layout", record)
        })?;

    let kind = match operation.trim() {
        "mkbranch" | "rmbranch" => return Ok(None),
        "checkin" => ModificationKind::Modified,
        "mkelem" => ModificationKind::Added,
        "rmelem" | "rmname" | "rmver" => ModificationKind::Deleted,
        _ => ModificationKind::Unknown,
    };

    let modified_time = NaiveDateTime::parse_from_str(date.trim(), "%Y%m%d.%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| ScmError::record(BACKEND, format!("bad date {date:?}: {e}"), record))?;

    let element = element.trim();
    let element = element.split("@@").next().unwrap_or(element);
    let version = version.trim();

    let mut modification = Modification::from_path(kind, element, modified_time)
        .with_user(user.trim())
        .with_version(version)
        .with_comment(comment.trim());
    if let Some(number) = version
        .rsplit(['\\', '/'])
        .next()
        .filter(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
    {
        modification = modification.with_change_number(number);
    }
    Ok(Some(modification))
}

fn default_executable() -> String {
    "cleartool".to_string()
}

fn default_label_comment() -> String {
    "Label created by scmwatch".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearCaseConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Snapshot view root, relative to the project working directory.
    pub view_path: PathBuf,
    /// View tag used when the view has to be created.
    #[serde(default)]
    pub view_name: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// VOB the label type is created in.
    #[serde(default)]
    pub vob: Option<String>,
    #[serde(default = "default_label_comment")]
    pub label_comment: String,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl ClearCaseConfig {
    pub fn new(view_path: impl Into<PathBuf>) -> Self {
        Self {
            executable: default_executable(),
            view_path: view_path.into(),
            view_name: None,
            branch: None,
            vob: None,
            label_comment: default_label_comment(),
            settings: ConnectorSettings::default(),
        }
    }
}

pub struct ClearCaseConnector {
    config: ClearCaseConfig,
    runner: ProcessRunner,
}

impl ClearCaseConnector {
    pub fn new(config: ClearCaseConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.view_path.as_os_str().is_empty() {
            return Err(ScmError::Config("clearcase: view_path must be set".to_string()));
        }
        let runner = config.settings.runner(executor);
        Ok(Self { config, runner })
    }

    fn view(&self, result: &IntegrationResult) -> PathBuf {
        result.base_from_working_directory(&self.config.view_path)
    }

    async fn run(&self, args: &ProcessArgumentBuilder) -> Result<String> {
        let info = self
            .config
            .settings
            .process(&self.config.executable, args.build());
        Ok(self.runner.run(&info).await?.stdout)
    }
}

#[async_trait]
impl SourceControl for ClearCaseConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        let view = self.view(to);
        let mut args = ProcessArgumentBuilder::new();
        args.add("lshist")
            .add("-r")
            .add("-nco")
            .add("-since")
            .add(from.start_time.format("%d-%b-%Y.%H:%M:%S").to_string())
            .add("-fmt")
            .add(history_format());
        if let Some(branch) = &self.config.branch {
            args.add("-branch").add(format!("brtype:{branch}"));
        }
        args.add(view.to_string_lossy());
        let stdout = self.run(&args).await?;

        let mut modifications = ClearCaseHistoryParser::new(self.config.settings.record_policy)
            .parse(&stdout, from.start_time, to.start_time)?;
        strip_folder_root(&mut modifications, &view.to_string_lossy());
        obs::emit_changes_detected(BACKEND, modifications.len());
        Ok(modifications)
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.auto_get_source {
            tracing::debug!(backend = BACKEND, "auto_get_source disabled, skipping update");
            return Ok(());
        }
        let view = self.view(result);
        let checkout = Checkout::decide(
            &view,
            Some(VIEW_MARKER),
            self.config.settings.force_full_checkout,
        );

        if checkout.is_full() {
            let Some(view_name) = self.config.view_name.as_deref() else {
                return Err(ScmError::Config(format!(
                    "clearcase: no view at {} and no view_name to create one",
                    view.display()
                )));
            };
            let mut args = ProcessArgumentBuilder::new();
            args.add("mkview")
                .add("-snapshot")
                .add("-tag")
                .add(view_name)
                .add(view.to_string_lossy());
            self.run(&args).await?;
        }

        let mut args = ProcessArgumentBuilder::new();
        args.add("update")
            .add("-force")
            .add("-overwrite")
            .add(view.to_string_lossy());
        self.run(&args).await?;
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
        let label_type = match &self.config.vob {
            Some(vob) => format!("{}@{vob}", result.label),
            None => result.label.clone(),
        };

        let mut args = ProcessArgumentBuilder::new();
        args.add("mklbtype")
            .add("-c")
            .add(&self.config.label_comment)
            .add(label_type);
        self.run(&args).await?;

        let mut args = ProcessArgumentBuilder::new();
        args.add("mklabel")
            .add("-recurse")
            .add(&result.label)
            .add(self.view(result).to_string_lossy());
        self.run(&args).await?;
        obs::emit_label_applied(BACKEND, &result.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(user: &str, date: &str, element: &str, version: &str, op: &str, comment: &str) -> String {
        [user, date, element, version, op, "!", "!", comment].join(FIELD_DELIMITER) + END_OF_RECORD
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 31, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_branch_events_dropped() {
        let raw = [
            record("alice", "20200102.103000", "/vobs/proj/src/a.c@@", "\\main\\7", "checkin", "fix"),
            record("alice", "20200102.103100", "/vobs/proj/src/a.c", "\\main\\dev", "mkbranch", ""),
            record("bob", "20200103.090000", "/vobs/proj/src/b.c", "\\main\\dev", "rmbranch", ""),
            record("bob", "20200104.090000", "/vobs/proj/src/c.c", "\\main\\1", "mkelem", "new"),
        ]
        .join("\n");
        let (from, to) = window();
        let mods = ClearCaseHistoryParser::default().parse(&raw, from, to).unwrap();

        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].kind, ModificationKind::Modified);
        assert_eq!(mods[0].folder_name, "vobs/proj/src");
        assert_eq!(mods[0].file_name, "a.c");
        assert_eq!(mods[0].change_number.as_deref(), Some("7"));
        assert_eq!(mods[1].kind, ModificationKind::Added);
        assert_eq!(mods[1].user_name, "bob");
    }

    #[test]
    fn test_comment_spanning_lines_and_containing_delimiter() {
        let comment = format!("first line\nsecond {FIELD_DELIMITER} line");
        let raw = record("carol", "20200105.120000", "/vobs/p/x.h", "/main/3", "checkin", &comment);
        let (from, to) = window();
        let mods = ClearCaseHistoryParser::default().parse(&raw, from, to).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].comment.as_deref(), Some(comment.as_str()));
        assert_eq!(
            mods[0].modified_time,
            Utc.with_ymd_and_hms(2020, 1, 5, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_applied() {
        let raw = record("dave", "20191231.235959", "/vobs/p/old.c", "/main/2", "checkin", "");
        let (from, to) = window();
        assert!(ClearCaseHistoryParser::default()
            .parse(&raw, from, to)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_short_record_policy() {
        let raw = format!(
            "alice{FIELD_DELIMITER}20200102.103000{END_OF_RECORD}\n{}",
            record("bob", "20200103.090000", "/vobs/p/b.c", "/main/4", "rmname", "")
        );
        let (from, to) = window();
        assert!(matches!(
            ClearCaseHistoryParser::default().parse(&raw, from, to),
            Err(ScmError::Record { .. })
        ));
        let mods = ClearCaseHistoryParser::new(RecordPolicy::Skip)
            .parse(&raw, from, to)
            .unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].kind, ModificationKind::Deleted);
    }

    #[test]
    fn test_history_format_uses_markers() {
        let format = history_format();
        assert!(format.starts_with("%u#~#~"));
        assert!(format.ends_with("@#@#@#@#@#@#@#@#@#@#@#@\\n"));
        assert_eq!(format.matches(FIELD_DELIMITER).count(), FIELD_COUNT - 1);
    }
}
