//! MKS Integrity (Source Integrity) through the `si` client.
//!
//! ```text
//! si viewsandbox --batch <conn> --sandbox=<dir>/<sandbox file> --recurse --filter=changed:all --fields=name,deltaflags
//! si memberinfo --batch <conn> --sandbox=<dir>/<sandbox file> <member>
//! si createsandbox --batch <conn> --project=<project> --recurse <dir>
//! si resync --batch <conn> --sandbox=<dir>/<sandbox file> --recurse --overwriteChanged --restoreTimestamp -f
//! si checkpoint --batch <conn> --project=<project> --label=<label>
//! si disconnect --batch <conn> --forceConfirm=yes
//! ```
//!
//! `<conn>` is `--hostname=<h> [--port=<n>] [--user=<u>] [--password=<p>]`.
//!
//! The client keeps one licensed server connection per host process. Every
//! connector of this backend shares a [`SessionRegistry`] and the connection
//! is dropped when the last in-flight operation finishes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    normalize_path, within_window, Checkout, HistoryParser, IntegrationResult, Modification,
    ModificationKind, ProcessArgumentBuilder, ProcessExecutor, ProcessInfo, ProcessRunner,
    RecordPolicy, Result, ScmError, SessionRegistry, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "mks";

const CREATED_DATE_FORMAT: &str = "%b %d, %Y - %I:%M %p";

const MEMBER_NAME: &str = "Member Name:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberDelta {
    Added,
    Changed,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberChange {
    pub name: String,
    pub delta: MemberDelta,
}

/// Members named by `si viewsandbox`. Sub-project lines are skipped.
pub fn parse_viewsandbox(raw: &str) -> Vec<MemberChange> {
    raw.lines()
        .filter_map(|line| {
            let (name, delta) = line.trim().rsplit_once(char::is_whitespace)?;
            let delta = match delta.to_ascii_lowercase().as_str() {
                "added" => MemberDelta::Added,
                "changed" => MemberDelta::Changed,
                "dropped" => MemberDelta::Dropped,
                _ => return None,
            };
            let name = normalize_path(name.trim());
            (!name.is_empty() && !name.ends_with(".pj")).then_some(MemberChange { name, delta })
        })
        .collect()
}

#[derive(Debug, Default)]
struct MemberInfo<'a> {
    name: String,
    revision: &'a str,
    created_by: &'a str,
    description: Vec<&'a str>,
    block: Vec<&'a str>,
}

fn parse_memberinfo_blocks<'a>(lines: &[&'a str]) -> Vec<MemberInfo<'a>> {
    let mut infos: Vec<MemberInfo<'a>> = Vec::new();
    let mut in_description = false;
    for &line in lines {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix(MEMBER_NAME) {
            in_description = false;
            infos.push(MemberInfo {
                name: normalize_path(name.trim()),
                ..MemberInfo::default()
            });
        }
        let Some(info) = infos.last_mut() else {
            continue;
        };
        info.block.push(line);

        let indented = line.starts_with(char::is_whitespace);
        if in_description && (indented || trimmed.is_empty()) {
            info.description.push(trimmed);
            continue;
        }
        in_description = false;
        if let Some(revision) = trimmed.strip_prefix("Member Revision:") {
            info.revision = revision.trim();
        } else if let Some(created) = trimmed.strip_prefix("Created By:") {
            info.created_by = created.trim();
        } else if let Some(first) = trimmed.strip_prefix("Revision Description:") {
            in_description = true;
            if !first.trim().is_empty() {
                info.description.push(first.trim());
            }
        }
    }
    infos
}

fn is_same_member(info_name: &str, member: &str) -> bool {
    info_name == member
        || info_name
            .strip_suffix(member)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Parses a viewsandbox listing followed by one memberinfo block per added
/// or changed member, as the connector collects them.
///
/// Dropped members have no memberinfo; they are reported at the end of the
/// window.
#[derive(Debug, Clone, Copy, Default)]
pub struct MksHistoryParser {
    policy: RecordPolicy,
}

impl MksHistoryParser {
    pub fn new(policy: RecordPolicy) -> Self {
        Self { policy }
    }

    fn member_modification(
        &self,
        change: &MemberChange,
        infos: &[MemberInfo<'_>],
        to: DateTime<Utc>,
    ) -> Result<Modification> {
        let kind = match change.delta {
            MemberDelta::Dropped => {
                return Ok(Modification::from_path(ModificationKind::Deleted, &change.name, to));
            }
            MemberDelta::Added => ModificationKind::Added,
            MemberDelta::Changed => ModificationKind::Modified,
        };
        let info = infos
            .iter()
            .find(|info| is_same_member(&info.name, &change.name))
            .ok_or_else(|| {
                ScmError::record(BACKEND, "no memberinfo for changed member", change.name.clone())
            })?;
        let fragment = || info.block.join("\n");

        let (user, date) = info
            .created_by
            .split_once(" on ")
            .ok_or_else(|| ScmError::record(BACKEND, "unreadable Created By line", fragment()))?;
        let modified_time = NaiveDateTime::parse_from_str(date.trim(), CREATED_DATE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| ScmError::record(BACKEND, format!("bad date {date:?}: {e}"), fragment()))?;

        Ok(Modification::from_path(kind, &change.name, modified_time)
            .with_user(user.trim())
            .with_version(info.revision)
            .with_comment(info.description.join("\n").trim()))
    }
}

impl HistoryParser for MksHistoryParser {
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        let lines: Vec<&str> = raw.lines().collect();
        let split = lines
            .iter()
            .position(|line| line.trim_start().starts_with(MEMBER_NAME))
            .unwrap_or(lines.len());
        let changes = parse_viewsandbox(&lines[..split].join("\n"));
        let infos = parse_memberinfo_blocks(&lines[split..]);

        let mut modifications = Vec::new();
        for change in &changes {
            if let Some(modification) = self
                .policy
                .handle(self.member_modification(change, &infos, to))?
            {
                if within_window(modification.modified_time, from, to) {
                    modifications.push(modification);
                }
            }
        }
        Ok(modifications)
    }
}

fn default_executable() -> String {
    "si".to_string()
}

fn default_sandbox_file() -> String {
    "project.pj".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MksConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Server-side project, e.g. `/proj/project.pj`.
    pub project: String,
    #[serde(default = "default_sandbox_file")]
    pub sandbox_file: String,
    #[serde(default = "default_true")]
    pub auto_disconnect: bool,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl MksConfig {
    pub fn new(host: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            host: host.into(),
            port: None,
            username: None,
            password: None,
            project: project.into(),
            sandbox_file: default_sandbox_file(),
            auto_disconnect: true,
            settings: ConnectorSettings::default(),
        }
    }
}

pub struct MksConnector {
    config: MksConfig,
    runner: ProcessRunner,
    parser: MksHistoryParser,
    session: Arc<SessionRegistry>,
}

impl MksConnector {
    pub fn new(
        config: MksConfig,
        executor: Arc<dyn ProcessExecutor>,
        session: Arc<SessionRegistry>,
    ) -> Result<Self> {
        if config.host.is_empty() || config.project.is_empty() {
            return Err(ScmError::Config("mks: host and project must be set".to_string()));
        }
        let runner = config.settings.runner(executor);
        let parser = MksHistoryParser::new(config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
            session,
        })
    }

    fn process(&self, command: &str, build: impl FnOnce(&mut ProcessArgumentBuilder)) -> ProcessInfo {
        let mut args = ProcessArgumentBuilder::new();
        args.add(command)
            .add("--batch")
            .add(format!("--hostname={}", self.config.host));
        if let Some(port) = self.config.port {
            args.add(format!("--port={port}"));
        }
        if let Some(user) = &self.config.username {
            args.add(format!("--user={user}"));
        }
        if let Some(password) = &self.config.password {
            args.add(format!("--password={password}"));
        }
        build(&mut args);
        let info = self.config.settings.process(&self.config.executable, args.build());
        match &self.config.password {
            Some(password) => info.with_secret(password),
            None => info,
        }
    }

    fn sandbox_arg(&self, dir: &Path) -> String {
        format!("--sandbox={}", dir.join(&self.config.sandbox_file).display())
    }

    async fn disconnect(&self) -> Result<()> {
        let info = self.process("disconnect", |args| {
            args.add("--forceConfirm=yes");
        });
        self.runner.run(&info).await?;
        Ok(())
    }

    /// The viewsandbox listing plus a memberinfo block per added or changed member.
    async fn collect_history(&self, dir: &Path) -> Result<String> {
        let sandbox = self.sandbox_arg(dir);
        let info = self.process("viewsandbox", |args| {
            args.add(&sandbox)
                .add("--recurse")
                .add("--filter=changed:all")
                .add("--fields=name,deltaflags");
        });
        let listing = self.runner.run(&info).await?.stdout;

        let mut transcript = listing.clone();
        for change in parse_viewsandbox(&listing) {
            if change.delta == MemberDelta::Dropped {
                continue;
            }
            let info = self.process("memberinfo", |args| {
                args.add(&sandbox).add(&change.name);
            });
            let output = self.runner.run(&info).await?;
            transcript.push('\n');
            transcript.push_str(&output.stdout);
        }
        Ok(transcript)
    }

    async fn detect(&self, from: &IntegrationResult, to: &IntegrationResult) -> Result<Vec<Modification>> {
        let dir = self.config.settings.working_dir(to);
        let transcript = self.collect_history(&dir).await?;
        self.parser.parse(&transcript, from.start_time, to.start_time)
    }

    async fn materialize(&self, result: &IntegrationResult) -> Result<bool> {
        let dir = self.config.settings.working_dir(result);
        let checkout = Checkout::decide(
            &dir,
            Some(self.config.sandbox_file.as_str()),
            self.config.settings.force_full_checkout,
        );
        let info = match checkout {
            Checkout::Incremental => self.process("resync", |args| {
                args.add(self.sandbox_arg(&dir))
                    .add("--recurse")
                    .add("--overwriteChanged")
                    .add("--restoreTimestamp")
                    .add("-f");
            }),
            Checkout::Full => {
                if let Some(parent) = dir.parent() {
                    ensure_dir(parent).await?;
                }
                self.process("createsandbox", |args| {
                    args.add(format!("--project={}", self.config.project))
                        .add("--recurse")
                        .add(dir.display().to_string());
                })
            }
        };
        self.runner.run(&info).await?;
        Ok(checkout.is_full())
    }

    async fn checkpoint(&self, label: &str) -> Result<()> {
        let info = self.process("checkpoint", |args| {
            args.add(format!("--project={}", self.config.project))
                .add(format!("--label={label}"));
        });
        self.runner.run(&info).await?;
        Ok(())
    }
}

#[async_trait]
impl SourceControl for MksConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        let this: &Self = self;
        let modifications = this
            .session
            .run(
                this.config.auto_disconnect,
                || this.detect(from, to),
                || this.disconnect(),
            )
            .await?;
        obs::emit_changes_detected(BACKEND, modifications.len());
        Ok(modifications)
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn materialize_working_copy(&mut self, result: &IntegrationResult) -> Result<()> {
        if !self.config.settings.auto_get_source {
            tracing::debug!(backend = BACKEND, "auto_get_source disabled, skipping get");
            return Ok(());
        }
        let this: &Self = self;
        let full = this
            .session
            .run(
                this.config.auto_disconnect,
                || this.materialize(result),
                || this.disconnect(),
            )
            .await?;
        obs::emit_working_copy_materialized(BACKEND, full);
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
        let this: &Self = self;
        this.session
            .run(
                this.config.auto_disconnect,
                || this.checkpoint(&result.label),
                || this.disconnect(),
            )
            .await?;
        obs::emit_label_applied(BACKEND, &result.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TRANSCRIPT: &str = "\
src/Main.java    changed
src/New.java     added
src/Old.java     dropped
lib/sub/project.pj    changed
Member Name: /builds/proj/src/Main.java
Sandbox Name: /builds/proj/project.pj
Member Revision: 1.5
Created By: alice on Jan 2, 2020 - 10:15 AM
State: Exp
Revision Description:
  fixed the parser
  for empty input
Labels:
Member Name: /builds/proj/src/New.java
Sandbox Name: /builds/proj/project.pj
Member Revision: 1.1
Created By: bob on Jan 3, 2020 - 2:05 PM
Revision Description:
Labels:
";

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 31, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_viewsandbox_skips_subprojects_and_headers() {
        let changes = parse_viewsandbox("Sandbox listing\nsrc/A.java changed\nsub/project.pj added\n");
        assert_eq!(
            changes,
            vec![MemberChange {
                name: "src/A.java".to_string(),
                delta: MemberDelta::Changed
            }]
        );
    }

    #[test]
    fn test_transcript_merges_memberinfo() {
        let (from, to) = window();
        let mods = MksHistoryParser::default().parse(TRANSCRIPT, from, to).unwrap();
        assert_eq!(mods.len(), 3);

        assert_eq!(mods[0].kind, ModificationKind::Modified);
        assert_eq!(mods[0].path(), "src/Main.java");
        assert_eq!(mods[0].version, "1.5");
        assert_eq!(mods[0].user_name, "alice");
        assert_eq!(mods[0].comment.as_deref(), Some("fixed the parser\nfor empty input"));
        assert_eq!(
            mods[0].modified_time,
            Utc.with_ymd_and_hms(2020, 1, 2, 10, 15, 0).unwrap()
        );

        assert_eq!(mods[1].kind, ModificationKind::Added);
        assert_eq!(mods[1].comment, None);
        assert_eq!(
            mods[1].modified_time,
            Utc.with_ymd_and_hms(2020, 1, 3, 14, 5, 0).unwrap()
        );

        assert_eq!(mods[2].kind, ModificationKind::Deleted);
        assert_eq!(mods[2].modified_time, to);
    }

    #[test]
    fn test_window_drops_older_revisions() {
        let from = Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2020, 1, 31, 0, 0, 0).unwrap();
        let mods = MksHistoryParser::default().parse(TRANSCRIPT, from, to).unwrap();
        assert_eq!(mods.len(), 2);
        assert!(mods.iter().all(|m| within_window(m.modified_time, from, to)));
    }

    #[test]
    fn test_missing_memberinfo_follows_policy() {
        let (from, to) = window();
        let raw = "src/Main.java changed\n";
        assert!(matches!(
            MksHistoryParser::default().parse(raw, from, to),
            Err(ScmError::Record { backend: "mks", .. })
        ));
        assert!(MksHistoryParser::new(RecordPolicy::Skip)
            .parse(raw, from, to)
            .unwrap()
            .is_empty());
    }
}
