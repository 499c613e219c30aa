//! SourceGear Vault through the `vault` command-line client.
//!
//! ```text
//! vault history <common> -rowlimit 0 -begindate <from> -enddate <to> <folder>
//! vault listworkingfolders <common>
//! vault get <common> -merge (overwrite | automatic) -setfiletime checkin [-destpath <dir>] <folder>
//! vault label <common> <folder> <label>
//! vault getlabel <common> [-labelworkingfolder <dir>] <folder> <label>
//! vault deletelabel <common> <folder> <label>
//! ```
//!
//! `<common>` is `-host <h> -user <u> -password <p> -repository <r> [-ssl]`.
//! The client wraps every answer in `<vault>...</vault>`, sometimes with
//! progress text around it.
//!
//! With `apply_label_before_get` set the label is applied before the source
//! is fetched and the build runs against exactly the labelled state; a failed
//! build then takes the label off again.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scmwatch_core::obs;
use scmwatch_core::{
    strip_folder_root, within_window, Checkout, HistoryParser, IntegrationResult, LabelTracker,
    Modification, ModificationKind, ProcessArgumentBuilder, ProcessExecutor, ProcessInfo,
    ProcessRunner, RecordPolicy, Result, ScmError, SourceControl,
};

use crate::settings::{ensure_dir, ConnectorSettings};

pub const BACKEND: &str = "vault";

pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// History item type codes as printed in the `type` attribute.
mod item_type {
    pub const ADDED: u32 = 10;
    pub const CHECK_IN: u32 = 60;
    pub const CREATED: u32 = 70;
    pub const DELETED: u32 = 80;
    pub const LABEL: u32 = 90;
    pub const OBLITERATED: u32 = 140;
    pub const RENAMED: u32 = 170;
    pub const UNDELETED: u32 = 210;
}

/// The outermost `<vault>...</vault>` fragment of the client's output.
pub fn extract_vault_fragment(raw: &str) -> Result<&str> {
    let start = raw.find("<vault>");
    let end = raw.rfind("</vault>").map(|i| i + "</vault>".len());
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&raw[start..end]),
        _ => Err(ScmError::parse(
            BACKEND,
            format!("no <vault> element in client output: {}", raw.trim()),
            raw,
        )),
    }
}

/// Parses the fragment and surfaces a `<result success="no">` as an error.
fn parse_document(raw: &str) -> Result<roxmltree::Document<'_>> {
    let fragment = extract_vault_fragment(raw)?;
    let doc = roxmltree::Document::parse(fragment)
        .map_err(|e| ScmError::parse(BACKEND, format!("invalid XML: {e}"), raw))?;
    let failed = doc
        .root_element()
        .children()
        .find(|n| n.has_tag_name("result"))
        .filter(|n| n.attribute("success").is_some_and(|s| s.eq_ignore_ascii_case("no")));
    if let Some(result) = failed {
        let message = result
            .descendants()
            .filter_map(|n| n.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        return Err(ScmError::backend(BACKEND, format!("command failed: {message}")));
    }
    Ok(doc)
}

#[derive(Debug, Clone)]
pub struct VaultHistoryParser {
    date_format: String,
    policy: RecordPolicy,
}

impl Default for VaultHistoryParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT, RecordPolicy::default())
    }
}

impl VaultHistoryParser {
    pub fn new(date_format: impl Into<String>, policy: RecordPolicy) -> Self {
        Self {
            date_format: date_format.into(),
            policy,
        }
    }

    fn parse_item(&self, item: roxmltree::Node<'_, '_>) -> Result<Option<Modification>> {
        let attr = |name: &str| item.attribute(name).unwrap_or_default();
        let fragment = || format!("<item txid={:?} name={:?}>", attr("txid"), attr("name"));

        let code: u32 = attr("type")
            .trim()
            .parse()
            .map_err(|_| ScmError::record(BACKEND, format!("bad type {:?}", attr("type")), fragment()))?;
        let kind = match code {
            item_type::LABEL => return Ok(None),
            item_type::ADDED | item_type::CREATED | item_type::UNDELETED => ModificationKind::Added,
            item_type::CHECK_IN => ModificationKind::Modified,
            item_type::DELETED | item_type::OBLITERATED => ModificationKind::Deleted,
            item_type::RENAMED => ModificationKind::Replaced,
            _ => ModificationKind::Unknown,
        };

        let date = attr("date");
        let modified_time = NaiveDateTime::parse_from_str(date.trim(), &self.date_format)
            .map(|naive| naive.and_utc())
            .map_err(|e| ScmError::record(BACKEND, format!("bad date {date:?}: {e}"), fragment()))?;

        Ok(Some(
            Modification::from_path(kind, attr("name"), modified_time)
                .with_user(attr("user"))
                .with_version(attr("version"))
                .with_change_number(attr("txid"))
                .with_comment(attr("comment")),
        ))
    }
}

impl HistoryParser for VaultHistoryParser {
    fn parse(&self, raw: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Modification>> {
        let doc = parse_document(raw)?;
        let mut modifications = Vec::new();
        for item in doc
            .descendants()
            .filter(|n| n.has_tag_name("history"))
            .flat_map(|history| history.children().filter(|n| n.has_tag_name("item")))
        {
            if let Some(Some(modification)) = self.policy.handle(self.parse_item(item))? {
                if within_window(modification.modified_time, from, to) {
                    modifications.push(modification);
                }
            }
        }
        Ok(modifications)
    }
}

/// Repository folders that have a local working folder set.
pub fn parse_working_folders(raw: &str) -> Result<Vec<(String, String)>> {
    let doc = parse_document(raw)?;
    Ok(doc
        .descendants()
        .filter(|n| n.has_tag_name("workingfolder"))
        .filter_map(|n| {
            Some((
                n.attribute("reposfolder")?.to_string(),
                n.attribute("localfolder").unwrap_or_default().to_string(),
            ))
        })
        .collect())
}

fn default_executable() -> String {
    "vault".to_string()
}

fn default_folder() -> String {
    "$".to_string()
}

fn default_true() -> bool {
    true
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub repository: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    #[serde(default)]
    pub ssl: bool,
    /// Label before fetching and build the labelled state.
    #[serde(default)]
    pub apply_label_before_get: bool,
    /// Fetch into the Vault working folder instead of the project directory.
    #[serde(default = "default_true")]
    pub use_working_directory: bool,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(flatten)]
    pub settings: ConnectorSettings,
}

impl VaultConfig {
    pub fn new(host: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            executable: default_executable(),
            host: host.into(),
            username: String::new(),
            password: String::new(),
            repository: repository.into(),
            folder: default_folder(),
            ssl: false,
            apply_label_before_get: false,
            use_working_directory: true,
            date_format: default_date_format(),
            settings: ConnectorSettings::default(),
        }
    }
}

pub struct VaultConnector {
    config: VaultConfig,
    runner: ProcessRunner,
    parser: VaultHistoryParser,
    labels: LabelTracker,
}

impl VaultConnector {
    pub fn new(config: VaultConfig, executor: Arc<dyn ProcessExecutor>) -> Result<Self> {
        if config.host.is_empty() || config.repository.is_empty() {
            return Err(ScmError::Config(
                "vault: host and repository must be set".to_string(),
            ));
        }
        let runner = config.settings.runner(executor);
        let parser =
            VaultHistoryParser::new(config.date_format.clone(), config.settings.record_policy);
        Ok(Self {
            config,
            runner,
            parser,
            labels: LabelTracker::new(),
        })
    }

    pub fn label_tracker(&self) -> &LabelTracker {
        &self.labels
    }

    fn process(&self, command: &str, build: impl FnOnce(&mut ProcessArgumentBuilder)) -> ProcessInfo {
        let mut args = ProcessArgumentBuilder::new();
        args.add(command)
            .add_pair("-host", Some(self.config.host.as_str()))
            .add_pair("-user", Some(self.config.username.as_str()))
            .add_pair("-password", Some(self.config.password.as_str()))
            .add_pair("-repository", Some(self.config.repository.as_str()))
            .add_if(self.config.ssl, "-ssl");
        build(&mut args);
        self.config
            .settings
            .process(&self.config.executable, args.build())
            .with_secret(self.config.password.as_str())
    }

    async fn run(&self, info: ProcessInfo) -> Result<String> {
        let stdout = self.runner.run(&info).await?.stdout;
        Ok(stdout)
    }

    async fn ensure_working_folder(&self) -> Result<()> {
        let stdout = self.run(self.process("listworkingfolders", |_| {})).await?;
        let folder = self.config.folder.trim_end_matches('/');
        let mapped = parse_working_folders(&stdout)?.into_iter().any(|(repos, _)| {
            let repos = repos.trim_end_matches('/');
            repos.eq_ignore_ascii_case(folder)
                || folder
                    .to_ascii_lowercase()
                    .starts_with(&format!("{}/", repos.to_ascii_lowercase()))
        });
        if mapped {
            return Ok(());
        }
        Err(ScmError::backend(
            BACKEND,
            format!(
                "no working folder is set for {folder}; set one with `vault setworkingfolder` \
                 or disable use_working_directory"
            ),
        ))
    }

    async fn apply_label(&mut self, label: &str) -> Result<()> {
        let folder = self.config.folder.clone();
        self.run(self.process("label", |args| {
            args.add(&folder).add(label);
        }))
        .await?;
        self.labels.mark_applied(label);
        obs::emit_label_applied(BACKEND, label);
        Ok(())
    }
}

#[async_trait]
impl SourceControl for VaultConnector {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %to.project_name))]
    async fn detect_changes(
        &mut self,
        from: &IntegrationResult,
        to: &IntegrationResult,
    ) -> Result<Vec<Modification>> {
        self.labels.begin_cycle();
        let info = self.process("history", |args| {
            args.add("-rowlimit")
                .add("0")
                .add("-begindate")
                .add(from.start_time.format("%Y-%m-%dT%H:%M:%S").to_string())
                .add("-enddate")
                .add(to.start_time.format("%Y-%m-%dT%H:%M:%S").to_string())
                .add(&self.config.folder);
        });
        let stdout = self.run(info).await?;

        let mut modifications = self.parser.parse(&stdout, from.start_time, to.start_time)?;
        strip_folder_root(&mut modifications, &self.config.folder);
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
        let checkout = Checkout::decide_dir(&dir, self.config.settings.force_full_checkout);
        if self.config.use_working_directory {
            self.ensure_working_folder().await?;
        } else {
            ensure_dir(&dir).await?;
        }
        let local_dir = dir.to_string_lossy().into_owned();

        let info = if self.config.apply_label_before_get {
            self.apply_label(&result.label).await?;
            self.process("getlabel", |args| {
                if !self.config.use_working_directory {
                    args.add("-labelworkingfolder").add(&local_dir);
                }
                args.add(&self.config.folder).add(&result.label);
            })
        } else {
            self.process("get", |args| {
                args.add("-merge")
                    .add(if checkout.is_full() { "overwrite" } else { "automatic" })
                    .add("-setfiletime")
                    .add("checkin");
                if !self.config.use_working_directory {
                    args.add("-destpath").add(&local_dir);
                }
                args.add(&self.config.folder);
            })
        };
        self.run(info).await?;
        obs::emit_working_copy_materialized(BACKEND, checkout.is_full());
        Ok(())
    }

    #[instrument(name = "scmwatch.connector", skip_all, fields(backend = BACKEND, project = %result.project_name))]
    async fn label(&mut self, result: &IntegrationResult) -> Result<()> {
        if self.config.apply_label_before_get {
            let Some(label) = self.labels.label_to_remove(result).map(str::to_string) else {
                obs::emit_label_skipped(BACKEND, "no label to roll back");
                return Ok(());
            };
            let folder = self.config.folder.clone();
            self.run(self.process("deletelabel", |args| {
                args.add(&folder).add(&label);
            }))
            .await?;
            self.labels.clear();
            obs::emit_label_removed(BACKEND, &label);
            return Ok(());
        }

        if !self.config.settings.label_on_success {
            obs::emit_label_skipped(BACKEND, "label_on_success disabled");
            return Ok(());
        }
        if !result.succeeded() {
            obs::emit_label_skipped(BACKEND, "integration did not succeed");
            return Ok(());
        }
        self.apply_label(&result.label).await
    }
}
