//! Alienbrain through the `ab` command-line client.
//!
//! ```text
//! ab setactivebranch <branch> <conn>                                  # when a branch is configured
//! ab find <project> <conn> -regex "SCIT > <from> AND SCIT < <to>" -format "#Name#|#DbPath#|#SCIT#|#Changed By#|#Version#|#CheckInComment#"
//! ab getlatest <project> <conn> -localpath <dir> -overwritewritable replace -overwritecheckedout replace [-forcefileupdate]
//! ab setlabel <project> <conn> -name <label> -comment <comment>
//! ```
//!
//! `<conn>` is `-s <server> -d <database> -u <user> -p <password>`. Check-in
//! times (`SCIT`) are Windows FILETIME values.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    normalize_path, split_path, strip_folder_root, within_window, Checkout, HistoryParser,
    IntegrationResult, Modification, ModificationKind, ProcessArgumentBuilder, ProcessExecutor,
    ProcessInfo, ProcessRunner, RecordPolicy, Result, ScmError, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "alienbrain";

pub const FIND_FORMAT: &str = "#Name#|#DbPath#|#SCIT#|#Changed By#|#Version#|#CheckInComment#";

const SCHEME: &str = "alienbrain://";

const TICKS_PER_SECOND: i64 = 10_000_000;

/// Seconds from 1601-01-01 to the Unix epoch.
const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

pub fn filetime_to_utc(ticks: i64) -> Option<DateTime<Utc>> {
    let secs = ticks.div_euclid(TICKS_PER_SECOND) - FILETIME_EPOCH_OFFSET;
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Times before 1601 clamp to 0 and times past the FILETIME range to
/// `i64::MAX`, so an open-ended window still yields a valid query.
pub fn utc_to_filetime(time: DateTime<Utc>) -> i64 {
    let ticks = (i128::from(time.timestamp()) + i128::from(FILETIME_EPOCH_OFFSET))
        * i128::from(TICKS_PER_SECOND)
        + i128::from(time.timestamp_subsec_nanos() / 100);
    i64::try_from(ticks.max(0)).unwrap_or(i64::MAX)
}

fn strip_scheme(path: &str) -> &str {
    path.strip_prefix(SCHEME).unwrap_or(path)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlienbrainHistoryParser {
    policy: RecordPolicy,
}

impl AlienbrainHistoryParser {
    pub fn new(policy: RecordPolicy) -> Self {
        Self { policy }
    }

    fn parse_line(&self, line: &str) -> Result<Modification> {
        let fields: Vec<&str> = line.splitn(6, '|').map(str::trim).collect();
        let [name, db_path, filetime, user, version, rest @ ..] = fields.as_slice() else {
            return Err(ScmError::record(
                BACKEND,
                format!("expected at least 5 fields, found {}", fields.len()),
                line,
            ));
        };
        let modified_time = filetime
            .parse::<i64>()
            .ok()
            .and_then(filetime_to_utc)
            .ok_or_else(|| ScmError::record(BACKEND, format!("bad check-in time {filetime:?}"), line))?;
        let kind = if *version == "1" {
            ModificationKind::Added
        } else {
            ModificationKind::Modified
        };

        let (folder, file) = split_path(strip_scheme(db_path));
        let folder = if file == *name { folder } else { normalize_path(strip_scheme(db_path)) };
        Ok(Modification::new(kind, folder, *name, modified_time)
            .with_user(*user)
            .with_version(*version)
            .with_comment(rest.first().copied().unwrap_or_default()))
    }
}

impl HistoryParser for AlienbrainHistoryParser {
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        let mut modifications = Vec::new();
        let mut previous_path: Option<&str> = None;
        for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let db_path = line.split('|').nth(1).map(str::trim);
            if db_path.is_some() && previous_path == db_path {
                continue;
            }
            if let Some(modification) = self.policy.handle(self.parse_line(line))? {
                previous_path = db_path;
                if within_window(modification.modified_time, from, to) {
                    modifications.push(modification);
                }
            }
        }
        Ok(modifications)
    }
}

fn default_executable() -> String {
    "ab".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlienbrainConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub server: String,
    pub database: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// e.g. `alienbrain://Game/Assets`
    pub project: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl AlienbrainConfig {
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            executable: default_executable(),
            server: server.into(),
            database: database.into(),
            username: String::new(),
            password: String::new(),
            project: project.into(),
            branch: None,
            settings: ConnectorSettings::default(),
        }
    }
}

pub struct AlienbrainConnector {
    config: AlienbrainConfig,
    runner: ProcessRunner,
    parser: AlienbrainHistoryParser,
}

impl AlienbrainConnector {
    pub fn new(config: AlienbrainConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.server.is_empty() || config.database.is_empty() {
            return Err(ScmError::Config(
                "alienbrain: server and database must be set".to_string(),
            ));
        }
        let runner = config.settings.runner(executor);
        let parser = AlienbrainHistoryParser::new(config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
        })
    }

    fn process(&self, command: &str, target: &str, build: impl FnOnce(&mut ProcessArgumentBuilder)) -> ProcessInfo {
        let mut args = ProcessArgumentBuilder::new();
        args.add(command)
            .add(target)
            .add_pair("-s", Some(self.config.server.as_str()))
            .add_pair("-d", Some(self.config.database.as_str()))
            .add_pair("-u", Some(self.config.username.as_str()))
            .add_pair("-p", Some(self.config.password.as_str()));
        build(&mut args);
        self.config
            .settings
            .process(&self.config.executable, args.build())
            .with_secret(self.config.password.as_str())
    }

    async fn select_branch(&self) -> Result<()> {
        let Some(branch) = &self.config.branch else {
            return Ok(());
        };
        self.runner
            .run(&self.process("setactivebranch", branch, |_| {}))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SourceControl for AlienbrainConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        self.select_branch().await?;
        let query = format!(
            "SCIT > {} AND SCIT < {}",
            utc_to_filetime(from.start_time),
            utc_to_filetime(to.start_time)
        );
        let info = self.process("find", &self.config.project, |args| {
            args.add("-regex").add(query).add("-format").add(FIND_FORMAT);
        });
        let output = self.runner.run(&info).await?;

        let mut modifications = self
            .parser
            .parse(&output.stdout, from.start_time, to.start_time)?;
        strip_folder_root(&mut modifications, strip_scheme(&self.config.project));
        obs::emit_changes_detected(BACKEND, modifications.len());
        Ok(modifications)
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.auto_get_source {
            tracing::debug!(backend = BACKEND, "auto_get_source disabled, skipping getlatest");
            return Ok(());
        }
        let dir = self.config.settings.working_dir(result);
        let checkout = Checkout::decide_dir(&dir, self.config.settings.force_full_checkout);
        ensure_dir(&dir).await?;
        self.select_branch().await?;

        let info = self.process("getlatest", &self.config.project, |args| {
            args.add("-localpath")
                .add(dir.to_string_lossy().into_owned())
                .add("-overwritewritable")
                .add("replace")
                .add("-overwritecheckedout")
                .add("replace")
                .add_if(checkout.is_full(), "-forcefileupdate");
        });
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
        let info = self.process("setlabel", &self.config.project, |args| {
            args.add("-name")
                .add(&result.label)
                .add("-comment")
                .add(format!("{} build {}", result.project_name, result.label));
        });
        self.runner.run(&info).await?;
        obs::emit_label_applied(BACKEND, &result.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // 2020-01-02T10:00:00Z and 2020-01-03T14:30:00Z
    const JAN_2: i64 = 132_224_328_000_000_000;
    const JAN_3: i64 = 132_225_354_000_000_000;

    fn report() -> String {
        format!(
            "Hero.psd|alienbrain://Game/Assets/Art/Hero.psd|{JAN_3}|alice|4|new cape\n\
             Hero.psd|alienbrain://Game/Assets/Art/Hero.psd|{JAN_2}|bob|3|older revision\n\
             Level1.map|alienbrain://Game/Assets/Maps/Level1.map|{JAN_2}|bob|1|\n"
        )
    }

    #[test]
    fn test_filetime_conversion() {
        let jan_2 = Utc.with_ymd_and_hms(2020, 1, 2, 10, 0, 0).unwrap();
        assert_eq!(filetime_to_utc(JAN_2), Some(jan_2));
        assert_eq!(utc_to_filetime(jan_2), JAN_2);
        assert_eq!(
            filetime_to_utc(116_444_736_000_000_000),
            Some(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_filetime_saturates_outside_its_range() {
        assert_eq!(utc_to_filetime(DateTime::<Utc>::MIN_UTC), 0);
        assert_eq!(utc_to_filetime(DateTime::<Utc>::MAX_UTC), i64::MAX);
        let before_1601 = Utc.with_ymd_and_hms(1600, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(utc_to_filetime(before_1601), 0);
        let start_1601 = Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(utc_to_filetime(start_1601), 0);
    }

    #[test]
    fn test_duplicates_collapse_and_window_applies() {
        let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2020, 1, 31, 0, 0, 0).unwrap();
        let mods = AlienbrainHistoryParser::default()
            .parse(&report(), from, to)
            .unwrap();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].file_name, "Hero.psd");
        assert_eq!(mods[0].folder_name, "Game/Assets/Art");
        assert_eq!(mods[0].user_name, "alice");
        assert_eq!(mods[0].kind, ModificationKind::Modified);
        assert_eq!(
            mods[0].modified_time,
            Utc.with_ymd_and_hms(2020, 1, 3, 14, 30, 0).unwrap()
        );
        assert_eq!(mods[1].file_name, "Level1.map");
        assert_eq!(mods[1].kind, ModificationKind::Added);
        assert_eq!(mods[1].comment, None);

        let narrow_from = Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap();
        let narrow = AlienbrainHistoryParser::default()
            .parse(&report(), narrow_from, to)
            .unwrap();
        assert_eq!(narrow.len(), 1);
        assert!(narrow
            .iter()
            .all(|m| within_window(m.modified_time, narrow_from, to)));
    }

    #[test]
    fn test_bad_filetime_is_record_error() {
        let (from, to) = (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
        let err = AlienbrainHistoryParser::default()
            .parse("a.txt|alienbrain://P/a.txt|soon|bob|2|x\n", from, to)
            .unwrap_err();
        assert!(matches!(err, ScmError::Record { backend: "alienbrain", .. }));
    }
}
