//! PVCS Version Manager through `pcli`.
//!
//! ```text
//! pcli vlog -pr<database> [-id<user>:<password>] -z -ds<from> -de<to> -xo"|" <project>
//! pcli vlog -pr<database> [-id<user>:<password>] -z -v<baseline label> -xo"|" <project>
//! pcli get -pr<database> [-id<user>:<password>] -z -o -a<dir> <project>
//! pcli label -pr<database> [-id<user>:<password>] -v<label> (-z <project> | <archive>...)
//! ```
//!
//! The vlog report prints one `archive|revision|date|author|comment` line per
//! revision, newest first.
//!
//! With a `baseline_label` configured only archives whose revisions are new
//! relative to the baseline receive the build label; everything else keeps
//! the labels it already has.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    normalize_path, strip_folder_root, within_window, DifferentialRestamper, HistoryParser,
    IntegrationResult, Modification, ModificationKind, ProcessArgumentBuilder, ProcessExecutor,
    ProcessInfo, ProcessRunner, RecordPolicy, Result, ScmError, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "pvcs";

pub const DEFAULT_DATE_FORMAT: &str = "%b %d %Y %H:%M:%S";

const COMMAND_DATE_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

const ARCHIVE_SUFFIX: &str = "-arc";

#[derive(Debug, Clone)]
pub struct PvcsHistoryParser {
    date_format: String,
    policy: RecordPolicy,
}

impl Default for PvcsHistoryParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT, RecordPolicy::default())
    }
}

impl PvcsHistoryParser {
    pub fn new(date_format: impl Into<String>, policy: RecordPolicy) -> Self {
        Self {
            date_format: date_format.into(),
            policy,
        }
    }

    /// All records, without the window applied.
    pub fn parse_all(&self, raw: &str) -> Result<Vec<Modification>> {
        let mut modifications = Vec::new();
        let mut previous_archive: Option<&str> = None;
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let archive = line.split('|').next().unwrap_or_default().trim();
            if previous_archive == Some(archive) {
                continue;
            }
            if let Some(modification) = self.policy.handle(self.parse_line(line))? {
                previous_archive = Some(archive);
                modifications.push(modification);
            }
        }
        Ok(modifications)
    }

    fn parse_line(&self, line: &str) -> Result<Modification> {
        let fields: Vec<&str> = line.splitn(5, '|').map(str::trim).collect();
        let [archive, revision, date, author, rest @ ..] = fields.as_slice() else {
            return Err(ScmError::record(
                BACKEND,
                format!("expected at least 4 fields, found {}", fields.len()),
                line,
            ));
        };
        let modified_time = NaiveDateTime::parse_from_str(date, &self.date_format)
            .map(|naive| naive.and_utc())
            .map_err(|e| ScmError::record(BACKEND, format!("bad date {date:?}: {e}"), line))?;
        let kind = if *revision == "1.0" {
            ModificationKind::Added
        } else {
            ModificationKind::Modified
        };
        let path = archive.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(*archive);

        Ok(Modification::from_path(kind, path, modified_time)
            .with_user(*author)
            .with_version(*revision)
            .with_comment(rest.first().copied().unwrap_or_default()))
    }
}

impl HistoryParser for PvcsHistoryParser {
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        let mut modifications = self.parse_all(raw)?;
        modifications.retain(|m| within_window(m.modified_time, from, to));
        Ok(modifications)
    }
}

fn default_executable() -> String {
    "pcli".to_string()
}

fn default_project() -> String {
    "/".to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PvcsConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub project_database: String,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Label whose revisions are already stamped; only newer ones get the
    /// build label.
    #[serde(default)]
    pub baseline_label: Option<String>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl PvcsConfig {
    pub fn new(project_database: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            project_database: project_database.into(),
            project: default_project(),
            username: None,
            password: None,
            baseline_label: None,
            date_format: default_date_format(),
            settings: ConnectorSettings::default(),
        }
    }
}

pub struct PvcsConnector {
    config: PvcsConfig,
    runner: ProcessRunner,
    parser: PvcsHistoryParser,
    restamper: DifferentialRestamper,
}

impl PvcsConnector {
    pub fn new(config: PvcsConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.project_database.is_empty() {
            return Err(ScmError::Config("pvcs: project_database must be set".to_string()));
        }
        let runner = config.settings.runner(executor);
        let parser =
            PvcsHistoryParser::new(config.date_format.clone(), config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
            restamper: DifferentialRestamper::new(),
        })
    }

    fn process(&self, command: &str, build: impl FnOnce(&mut ProcessArgumentBuilder)) -> ProcessInfo {
        let mut args = ProcessArgumentBuilder::new();
        args.add(command)
            .add(format!("-pr{}", self.config.project_database));
        if let Some(user) = &self.config.username {
            match &self.config.password {
                Some(password) => args.add(format!("-id{user}:{password}")),
                None => args.add(format!("-id{user}")),
            };
        }
        build(&mut args);
        let info = self.config.settings.process(&self.config.executable, args.build());
        match &self.config.password {
            Some(password) => info.with_secret(password),
            None => info,
        }
    }

    /// Archive path of a project-relative record, as `pcli label` expects it.
    fn archive_path(&self, modification: &Modification) -> String {
        format!(
            "/{}",
            normalize_path(&format!("{}/{}", self.config.project, modification.path()))
        )
    }
}

async fn fetch_history(
    runner: &ProcessRunner,
    parser: &PvcsHistoryParser,
    info: &ProcessInfo,
    project: &str,
) -> Result<Vec<Modification>> {
    let output = runner.run(info).await?;
    let mut modifications = parser.parse_all(&output.stdout)?;
    strip_folder_root(&mut modifications, project);
    Ok(modifications)
}

#[async_trait]
impl SourceControl for PvcsConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        self.restamper.begin_cycle();
        let info = self.process("vlog", |args| {
            args.add("-z")
                .add(format!("-ds{}", from.start_time.format(COMMAND_DATE_FORMAT)))
                .add(format!("-de{}", to.start_time.format(COMMAND_DATE_FORMAT)))
                .add("-xo|")
                .add(&self.config.project);
        });
        let output = self.runner.run(&info).await?;

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
        ensure_dir(&dir).await?;

        // pcli has no notion of a working copy to update; every get rewrites.
        let info = self.process("get", |args| {
            args.add("-z")
                .add("-o")
                .add(format!("-a{}", dir.display()))
                .add(&self.config.project);
        });
        self.runner.run(&info).await?;
        obs::emit_working_copy_materialized(BACKEND, true);
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
        let label = result.label.clone();

        let Some(baseline) = self.config.baseline_label.clone() else {
            let info = self.process("label", |args| {
                args.add(format!("-v{label}"))
                    .add("-z")
                    .add(&self.config.project);
            });
            self.runner.run(&info).await?;
            obs::emit_label_applied(BACKEND, &label);
            return Ok(());
        };

        let baseline_info = self.process("vlog", |args| {
            args.add("-z")
                .add(format!("-v{baseline}"))
                .add("-xo|")
                .add(&self.config.project);
        });
        let (runner, parser, project) = (&self.runner, &self.parser, self.config.project.as_str());
        let pending = self
            .restamper
            .pending(&result.modifications, || {
                fetch_history(runner, parser, &baseline_info, project)
            })
            .await?;
        if pending.is_empty() {
            obs::emit_label_skipped(BACKEND, "nothing newer than the baseline label");
            return Ok(());
        }

        tracing::debug!(
            backend = BACKEND,
            baseline = %baseline,
            pending = pending.len(),
            "re-stamping revisions newer than the baseline"
        );
        let archives: Vec<String> = pending.iter().map(|m| self.archive_path(m)).collect();
        let info = self.process("label", |args| {
            args.add(format!("-v{label}"));
            for archive in archives {
                args.add(archive);
            }
        });
        self.runner.run(&info).await?;
        obs::emit_label_applied(BACKEND, &label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const REPORT: &str = "\
/proj/src/main.c-arc|1.4|Jan 03 2020 09:15:00|alice|tighten bounds check
/proj/src/main.c-arc|1.4|Jan 03 2020 09:15:00|alice|tighten bounds check
/proj/src/main.c-arc|1.3|Jan 02 2020 17:00:00|bob|earlier change
/proj/src/util.h-arc|1.0|Jan 02 2020 11:30:00|carol|
/proj/docs/notes.txt-arc|1.7|Dec 28 2019 08:00:00|bob|outside the window
";

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 31, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_consecutive_duplicates_collapse_to_first() {
        let (from, to) = window();
        let mods = PvcsHistoryParser::default().parse(REPORT, from, to).unwrap();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].file_name, "main.c");
        assert_eq!(mods[0].folder_name, "proj/src");
        assert_eq!(mods[0].version, "1.4");
        assert_eq!(mods[0].kind, ModificationKind::Modified);
        assert_eq!(mods[0].comment.as_deref(), Some("tighten bounds check"));
        assert_eq!(mods[1].file_name, "util.h");
        assert_eq!(mods[1].kind, ModificationKind::Added);
        assert_eq!(mods[1].comment, None);
        assert!(mods.iter().all(|m| within_window(m.modified_time, from, to)));
    }

    #[test]
    fn test_comment_may_contain_delimiter() {
        let mods = PvcsHistoryParser::default()
            .parse_all("/p/a.c-arc|1.2|Jan 03 2020 09:15:00|alice|fix a|b parsing\n")
            .unwrap();
        assert_eq!(mods[0].comment.as_deref(), Some("fix a|b parsing"));
    }

    #[test]
    fn test_bad_date_is_record_error_or_skipped() {
        let raw = "/p/a.c-arc|1.2|yesterday|alice|x\n/p/b.c-arc|1.1|Jan 03 2020 09:15:00|bob|y\n";
        assert!(matches!(
            PvcsHistoryParser::default().parse_all(raw),
            Err(ScmError::Record { backend: "pvcs", .. })
        ));
        let skipping = PvcsHistoryParser::new(DEFAULT_DATE_FORMAT, RecordPolicy::Skip);
        let mods = skipping.parse_all(raw).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].file_name, "b.c");
    }

    #[test]
    fn test_short_line_is_record_error() {
        assert!(PvcsHistoryParser::default().parse_all("/p/a.c-arc|1.2\n").is_err());
    }
}
