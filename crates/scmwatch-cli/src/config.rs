//! TOML project files.
//!
//! ```toml
//! name = "website"
//! working_directory = "work"
//!
//! [source]
//! type = "svn"
//! trunk_url = "https://svn.example.org/repo/trunk"
//! retry = { attempts = 3, delay_secs = 10 }
//!
//! [[filters.exclude]]
//! type = "user"
//! names = ["buildbot"]
//!
//! [url_builder]
//! type = "file"
//! url = "https://svn.example.org/viewvc/trunk/{0}"
//! ```
//!
//! Relative directories are resolved against the project file's location.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use scmwatch_backends::BackendConfig;
use scmwatch_core::{
    build_filter_set, FilterConfig, FilterSet, IntegrationResult, Modification, ProcessExecutor,
    SessionRegistries, SourceControlPipeline, UrlBuilderConfig,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSection {
    #[serde(default)]
    pub include: Vec<FilterConfig>,
    #[serde(default)]
    pub exclude: Vec<FilterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectFile {
    pub name: String,
    pub working_directory: PathBuf,
    /// Defaults to `<working_directory>/artifacts`.
    #[serde(default)]
    pub artifact_directory: Option<PathBuf>,
    pub source: BackendConfig,
    #[serde(default)]
    pub filters: FilterSection,
    #[serde(default)]
    pub url_builder: Option<UrlBuilderConfig>,
}

impl ProjectFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read project file {}", path.display()))?;
        let mut project = Self::from_toml(&text)
            .with_context(|| format!("invalid project file {}", path.display()))?;
        if let Some(base) = path.parent() {
            project.resolve_relative_to(base);
        }
        Ok(project)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if self.working_directory.is_relative() {
            self.working_directory = base.join(&self.working_directory);
        }
        if let Some(artifacts) = &self.artifact_directory {
            if artifacts.is_relative() {
                self.artifact_directory = Some(base.join(artifacts));
            }
        }
    }

    pub fn artifact_directory(&self) -> PathBuf {
        self.artifact_directory
            .clone()
            .unwrap_or_else(|| self.working_directory.join("artifacts"))
    }

    /// An integration result for this project starting at `start_time`.
    pub fn result(&self, start_time: DateTime<Utc>) -> IntegrationResult {
        IntegrationResult::new(
            &self.name,
            &self.working_directory,
            self.artifact_directory(),
        )
        .with_start_time(start_time)
    }

    pub fn filter_set(&self) -> Result<FilterSet> {
        build_filter_set(&self.filters.include, &self.filters.exclude)
            .context("invalid modification filter")
    }

    /// The configured connector wrapped with this project's filters and URL
    /// builder.
    pub fn connector(
        &self,
        executor: Arc<dyn ProcessExecutor>,
        sessions: &SessionRegistries,
    ) -> Result<SourceControlPipeline> {
        let inner = self
            .source
            .build(executor, sessions)
            .with_context(|| format!("invalid [source] for project {}", self.name))?;
        let mut pipeline = SourceControlPipeline::new(inner).with_filters(self.filter_set()?);
        if let Some(config) = &self.url_builder {
            pipeline = pipeline.with_url_builder(config.build().context("invalid [url_builder]")?);
        }
        Ok(pipeline)
    }

    /// Filters and URLs applied to modifications parsed outside a connector.
    pub fn post_process(&self, modifications: Vec<Modification>) -> Result<Vec<Modification>> {
        let mut modifications = self.filter_set()?.apply(modifications);
        if let Some(config) = &self.url_builder {
            config
                .build()
                .context("invalid [url_builder]")?
                .setup_modifications(&mut modifications);
        }
        Ok(modifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scmwatch_core::ModificationKind;

    const PROJECT: &str = r#"
name = "website"
working_directory = "work"

[source]
type = "svn"
trunk_url = "https://svn.example.org/repo/trunk"
repository_path = "/trunk"
label_on_success = true
retry = { attempts = 3, delay_secs = 10 }

[[filters.exclude]]
type = "user"
names = ["buildbot"]

[[filters.exclude]]
type = "path"
pattern = "**/*.generated.cs"

[url_builder]
type = "file"
url = "https://svn.example.org/viewvc/trunk/{0}"
"#;

    #[test]
    fn test_project_file_sections() {
        let project = ProjectFile::from_toml(PROJECT).unwrap();
        assert_eq!(project.name, "website");
        assert_eq!(project.source.backend_name(), "svn");
        assert!(project.source.settings().label_on_success);
        assert_eq!(project.source.settings().retry.map(|r| r.attempts), Some(3));
        assert!(project.filters.include.is_empty());
        assert_eq!(project.filters.exclude.len(), 2);
        assert!(matches!(project.url_builder, Some(UrlBuilderConfig::File { .. })));
    }

    #[test]
    fn test_load_resolves_relative_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("website.toml");
        std::fs::write(&path, PROJECT).unwrap();

        let project = ProjectFile::load(&path).unwrap();
        assert_eq!(project.working_directory, dir.path().join("work"));
        assert_eq!(project.artifact_directory(), dir.path().join("work").join("artifacts"));
    }

    #[test]
    fn test_unknown_source_type_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(
            &path,
            "name = \"x\"\nworking_directory = \"/w\"\n[source]\ntype = \"git\"\n",
        )
        .unwrap();

        let err = ProjectFile::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn test_post_process_filters_and_links() {
        let project = ProjectFile::from_toml(PROJECT).unwrap();
        let at = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let modifications = vec![
            Modification::new(ModificationKind::Modified, "src", "Page.cs", at).with_user("alice"),
            Modification::new(ModificationKind::Modified, "src", "Page.generated.cs", at)
                .with_user("alice"),
            Modification::new(ModificationKind::Added, "src", "Nightly.cs", at)
                .with_user("buildbot"),
        ];

        let kept = project.post_process(modifications).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(
            kept[0].url.as_deref(),
            Some("https://svn.example.org/viewvc/trunk/src/Page.cs")
        );
    }
}
