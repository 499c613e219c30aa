//! A plain FTP directory mirrored through `curl`.
//!
//! ```text
//! curl -s -S [--user <u>:<p>] <scheme>://<host>[:<port>]/<dir>/              # LIST
//! curl -s -S -R --create-dirs [--user <u>:<p>] -o <local file> <url of file>  # download
//! ```
//!
//! There is no history on the server. A remote file counts as changed when it
//! is missing locally or its listed time is newer than the local copy's
//! modification time. Downloads keep the server's timestamp (`-R`), so the
//! next comparison sees them as current.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    normalize_path, within_window, Checkout, HistoryParser, IntegrationResult, Modification,
    ModificationKind, ProcessArgumentBuilder, ProcessExecutor, ProcessInfo, ProcessRunner,
    RecordPolicy, Result, ScmError, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "ftp";

static LIST_LINE: OnceLock<Regex> = OnceLock::new();

fn list_line_regex() -> &'static Regex {
    LIST_LINE.get_or_init(|| {
        Regex::new(
            r"^(?P<type>[dl\-])[rwxsStT\-]{9}\S*\s+\d+\s+\S+\s+\S+\s+(?P<size>\d+)\s+(?P<month>[A-Za-z]{3})\s+(?P<day>\d{1,2})\s+(?P<when>\d{1,2}:\d{2}|\d{4})\s+(?P<name>.+?)\s*$",
        )
        .expect("list line regex compiles")
    })
}

/// One entry of a Unix-style `LIST` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Parses `LIST` lines. Entries listed with a time instead of a year are
/// placed in the year that keeps them at or before `reference`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpListingParser {
    policy: RecordPolicy,
}

impl FtpListingParser {
    pub fn new(policy: RecordPolicy) -> Self {
        Self { policy }
    }

    pub fn parse_listing(&self, raw: &str, reference: DateTime<Utc>) -> Result<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        for line in raw.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()) {
            if line.starts_with("total ") {
                continue;
            }
            if let Some(Some(entry)) = self.policy.handle(parse_line(line, reference))? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

fn parse_line(line: &str, reference: DateTime<Utc>) -> Result<Option<RemoteEntry>> {
    let caps = list_line_regex()
        .captures(line)
        .ok_or_else(|| ScmError::record(BACKEND, "unrecognized LIST line", line))?;
    let mut name = &caps["name"];
    if &caps["type"] == "l" {
        name = name.split_once(" -> ").map_or(name, |(link, _)| link);
    }
    if name == "." || name == ".." {
        return Ok(None);
    }
    let size = caps["size"]
        .parse()
        .map_err(|_| ScmError::record(BACKEND, "bad size", line))?;
    let modified = listed_time(&caps["month"], &caps["day"], &caps["when"], reference)
        .ok_or_else(|| ScmError::record(BACKEND, "bad date", line))?;
    Ok(Some(RemoteEntry {
        name: name.to_string(),
        is_dir: &caps["type"] == "d",
        size,
        modified,
    }))
}

fn listed_time(month: &str, day: &str, when: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parse = |year: i32, clock: &str| {
        NaiveDateTime::parse_from_str(&format!("{month} {day} {year} {clock}"), "%b %d %Y %H:%M")
            .ok()
            .map(|naive| naive.and_utc())
    };
    if let Ok(year) = when.parse::<i32>() {
        return parse(year, "00:00");
    }
    let this_year = parse(reference.year(), when)?;
    // Servers show a clock time for recent files; a date ahead of the
    // reference belongs to the previous year.
    if this_year > reference + Duration::days(1) {
        parse(reference.year() - 1, when)
    } else {
        Some(this_year)
    }
}

impl HistoryParser for FtpListingParser {
    /// Files of one listing whose listed time falls inside the window.
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        Ok(self
            .parse_listing(raw, to)?
            .into_iter()
            .filter(|entry| !entry.is_dir && within_window(entry.modified, from, to))
            .map(|entry| Modification::new(ModificationKind::Modified, "", entry.name, entry.modified))
            .collect())
    }
}

fn default_executable() -> String {
    "curl".to_string()
}

fn default_remote_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FtpConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// `ftps://` instead of `ftp://`.
    #[serde(default)]
    pub secure: bool,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl FtpConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            host: host.into(),
            port: None,
            username: None,
            password: None,
            remote_path: default_remote_path(),
            recursive: true,
            secure: false,
            settings: ConnectorSettings::default(),
        }
    }
}

/// A remote file and its path relative to `remote_path`.
#[derive(Debug, Clone)]
struct RemoteFile {
    folder: String,
    entry: RemoteEntry,
}

impl RemoteFile {
    fn relative_path(&self) -> String {
        normalize_path(&format!("{}/{}", self.folder, self.entry.name))
    }
}

pub struct FtpConnector {
    config: FtpConfig,
    runner: ProcessRunner,
    parser: FtpListingParser,
}

impl FtpConnector {
    pub fn new(config: FtpConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.host.is_empty() {
            return Err(ScmError::Config("ftp: host must be set".to_string()));
        }
        let runner = config.settings.runner(executor);
        let parser = FtpListingParser::new(config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
        })
    }

    /// URL of a path relative to `remote_path`; directories end in `/`.
    pub fn url(&self, relative: &str, is_dir: bool) -> String {
        let scheme = if self.config.secure { "ftps" } else { "ftp" };
        let port = self.config.port.map(|p| format!(":{p}")).unwrap_or_default();
        let path = normalize_path(&format!("{}/{}", self.config.remote_path, relative));
        let mut url = format!("{scheme}://{}{port}/{}", self.config.host, path.replace(' ', "%20"));
        if is_dir && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    fn process(&self, build: impl FnOnce(&mut ProcessArgumentBuilder)) -> ProcessInfo {
        let mut args = ProcessArgumentBuilder::new();
        args.add("-s").add("-S");
        if let Some(user) = &self.config.username {
            let password = self.config.password.as_deref().unwrap_or_default();
            args.add("--user").add(format!("{user}:{password}"));
        }
        build(&mut args);
        let info = self.config.settings.process(&self.config.executable, args.build());
        match &self.config.password {
            Some(password) => info.with_secret(password),
            None => info,
        }
    }

    async fn list_remote(&self, reference: DateTime<Utc>) -> Result<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut pending = vec![String::new()];
        while let Some(folder) = pending.pop() {
            let url = self.url(&folder, true);
            let info = self.process(|args| {
                args.add(url);
            });
            let output = self.runner.run(&info).await?;
            for entry in self.parser.parse_listing(&output.stdout, reference)? {
                if entry.is_dir {
                    if self.config.recursive {
                        pending.push(normalize_path(&format!("{folder}/{}", entry.name)));
                    }
                    continue;
                }
                files.push(RemoteFile {
                    folder: folder.clone(),
                    entry,
                });
            }
        }
        Ok(files)
    }

    /// `Some(kind)` when the local copy is missing or older than the listing.
    async fn compare(local_root: &Path, file: &RemoteFile) -> Result<Option<ModificationKind>> {
        let local = local_root.join(file.relative_path());
        let metadata = match tokio::fs::metadata(&local).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Some(ModificationKind::Added))
            }
            Err(e) => return Err(e.into()),
        };
        let local_time: DateTime<Utc> = metadata.modified()?.into();
        Ok((file.entry.modified > local_time).then_some(ModificationKind::Modified))
    }

    async fn changed_files(
        &self,
        local_root: &Path,
        reference: DateTime<Utc>,
    ) -> Result<Vec<(RemoteFile, ModificationKind)>> {
        let mut changed = Vec::new();
        for file in self.list_remote(reference).await? {
            if let Some(kind) = Self::compare(local_root, &file).await? {
                changed.push((file, kind));
            }
        }
        Ok(changed)
    }

    async fn download(&self, local_root: &Path, file: &RemoteFile) -> Result<()> {
        let relative = file.relative_path();
        let target: PathBuf = local_root.join(&relative);
        let url = self.url(&relative, false);
        let info = self.process(|args| {
            args.add("-R")
                .add("--create-dirs")
                .add("-o")
                .add(target.to_string_lossy().into_owned())
                .add(url);
        });
        self.runner.run(&info).await?;
        Ok(())
    }
}

#[async_trait]
impl SourceControl for FtpConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        tracing::trace!(backend = BACKEND, from = %from.start_time, "comparing remote listing with local copy");
        let local_root = self.config.settings.working_dir(to);
        let modifications: Vec<Modification> = self
            .changed_files(&local_root, to.start_time)
            .await?
            .into_iter()
            .map(|(file, kind)| {
                Modification::new(kind, file.folder, file.entry.name, file.entry.modified)
            })
            .collect();
        obs::emit_changes_detected(BACKEND, modifications.len());
        Ok(modifications)
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.auto_get_source {
            tracing::debug!(backend = BACKEND, "auto_get_source disabled, skipping download");
            return Ok(());
        }
        let local_root = self.config.settings.working_dir(result);
        let checkout = Checkout::decide_dir(&local_root, self.config.settings.force_full_checkout);
        ensure_dir(&local_root).await?;

        let files: Vec<RemoteFile> = match checkout {
            Checkout::Full => self.list_remote(result.start_time).await?,
            Checkout::Incremental => self
                .changed_files(&local_root, result.start_time)
                .await?
                .into_iter()
                .map(|(file, _)| file)
                .collect(),
        };
        tracing::debug!(backend = BACKEND, files = files.len(), "downloading");
        for file in &files {
            self.download(&local_root, file).await?;
        }
        obs::emit_working_copy_materialized(BACKEND, checkout.is_full());
        Ok(())
    }

    async fn label(&mut self, _result: &IntegrationResult) -> Result<()> {
        obs::emit_label_skipped(BACKEND, "ftp has no labels");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LISTING: &str = "\
total 12
drwxr-xr-x   2 ftp      ftp          4096 Jan 02  2020 docs
-rw-r--r--   1 ftp      ftp          1532 Mar 14 09:30 README.txt
-rw-r--r--   1 ftp      ftp        204800 Dec 30 23:10 release notes.pdf
lrwxrwxrwx   1 ftp      ftp            11 Jan 02  2020 latest -> release.zip
drwxr-xr-x   2 ftp      ftp          4096 Jan 02  2020 .
";

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_listing_entries() {
        let entries = FtpListingParser::default()
            .parse_listing(LISTING, reference())
            .unwrap();
        assert_eq!(entries.len(), 4);

        assert!(entries[0].is_dir);
        assert_eq!(entries[0].name, "docs");
        assert_eq!(
            entries[0].modified,
            Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap()
        );

        assert_eq!(entries[1].name, "README.txt");
        assert_eq!(entries[1].size, 1532);
        assert_eq!(
            entries[1].modified,
            Utc.with_ymd_and_hms(2021, 3, 14, 9, 30, 0).unwrap()
        );

        // December is ahead of an April reference, so it is last year's.
        assert_eq!(entries[2].name, "release notes.pdf");
        assert_eq!(
            entries[2].modified,
            Utc.with_ymd_and_hms(2020, 12, 30, 23, 10, 0).unwrap()
        );

        assert_eq!(entries[3].name, "latest");
        assert!(!entries[3].is_dir);
    }

    #[test]
    fn test_unrecognized_line_follows_policy() {
        let raw = "this is not a listing\n-rw-r--r-- 1 a b 3 Jan 02 2020 ok.txt\n";
        assert!(FtpListingParser::default().parse_listing(raw, reference()).is_err());
        let entries = FtpListingParser::new(RecordPolicy::Skip)
            .parse_listing(raw, reference())
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_parse_applies_window_to_files() {
        let from = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let mods = FtpListingParser::default()
            .parse(LISTING, from, reference())
            .unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].file_name, "README.txt");
    }

    #[test]
    fn test_url_building() {
        let mut config = FtpConfig::new("ftp.example.org");
        config.remote_path = "/pub/builds".to_string();
        config.port = Some(2121);
        let executor = Arc::new(scmwatch_core::fakes::ScriptedExecutor::new());
        let connector = FtpConnector::new(config, executor).unwrap();
        assert_eq!(
            connector.url("", true),
            "ftp://ftp.example.org:2121/pub/builds/"
        );
        assert_eq!(
            connector.url("docs/release notes.pdf", false),
            "ftp://ftp.example.org:2121/pub/builds/docs/release%20notes.pdf"
        );
    }
}
