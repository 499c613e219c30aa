//! Post-processors that link modifications to web viewers and issue trackers.
//!
//! Templates use `{0}` as the placeholder for the value each builder derives
//! from a modification (its path, change number or issue id).

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScmError};
use crate::modification::Modification;

/// Rewrites `url` and/or `issue_url` on a list of modifications in place.
pub trait ModificationUrlBuilder: Send + Sync {
    fn setup_modifications(&self, modifications: &mut [Modification]);
}

fn fill(template: &str, value: &str) -> String {
    template.replace("{0}", value)
}

/// Sets `url` from the modification's path, e.g. a ViewVC or WebSVN link.
#[derive(Debug, Clone)]
pub struct FileUrlBuilder {
    template: String,
}

impl FileUrlBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl ModificationUrlBuilder for FileUrlBuilder {
    fn setup_modifications(&self, modifications: &mut [Modification]) {
        for modification in modifications.iter_mut() {
            modification.url = Some(fill(&self.template, &modification.path()));
        }
    }
}

/// Sets `url` from the change number; records without one are left alone.
#[derive(Debug, Clone)]
pub struct ChangeNumberUrlBuilder {
    template: String,
}

impl ChangeNumberUrlBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl ModificationUrlBuilder for ChangeNumberUrlBuilder {
    fn setup_modifications(&self, modifications: &mut [Modification]) {
        for modification in modifications.iter_mut() {
            if let Some(change) = &modification.change_number {
                modification.url = Some(fill(&self.template, change));
            }
        }
    }
}

/// Sets `issue_url` from the first number mentioned in the comment.
#[derive(Debug, Clone)]
pub struct DefaultIssueTracker {
    template: String,
    number: Regex,
}

impl DefaultIssueTracker {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            number: Regex::new(r"\d+").expect("static regex"),
        }
    }
}

impl ModificationUrlBuilder for DefaultIssueTracker {
    fn setup_modifications(&self, modifications: &mut [Modification]) {
        for modification in modifications.iter_mut() {
            let Some(comment) = modification.comment.as_deref() else {
                continue;
            };
            if let Some(id) = self.number.find(comment) {
                modification.issue_url = Some(fill(&self.template, id.as_str()));
            }
        }
    }
}

/// Sets `issue_url` by matching `find` in the comment and rewriting the match
/// with `replace` (regex replacement syntax, `$1` etc.).
#[derive(Debug, Clone)]
pub struct RegexIssueTracker {
    find: Regex,
    replace: String,
}

impl RegexIssueTracker {
    pub fn new(find: &str, replace: impl Into<String>) -> Result<Self> {
        let find = Regex::new(find)
            .map_err(|e| ScmError::Config(format!("invalid issue tracker pattern {find:?}: {e}")))?;
        Ok(Self {
            find,
            replace: replace.into(),
        })
    }
}

impl ModificationUrlBuilder for RegexIssueTracker {
    fn setup_modifications(&self, modifications: &mut [Modification]) {
        for modification in modifications.iter_mut() {
            let Some(comment) = modification.comment.as_deref() else {
                continue;
            };
            if let Some(found) = self.find.find(comment) {
                let url = self
                    .find
                    .replace(found.as_str(), self.replace.as_str())
                    .into_owned();
                modification.issue_url = Some(url);
            }
        }
    }
}

/// Runs each builder in order over the same list. Order is significant:
/// a later builder overwrites fields set by an earlier one.
#[derive(Default)]
pub struct CompositeUrlBuilder {
    builders: Vec<Box<dyn ModificationUrlBuilder>>,
}

impl CompositeUrlBuilder {
    pub fn new(builders: Vec<Box<dyn ModificationUrlBuilder>>) -> Self {
        Self { builders }
    }

    pub fn push(&mut self, builder: Box<dyn ModificationUrlBuilder>) {
        self.builders.push(builder);
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

impl ModificationUrlBuilder for CompositeUrlBuilder {
    fn setup_modifications(&self, modifications: &mut [Modification]) {
        for builder in &self.builders {
            builder.setup_modifications(modifications);
        }
    }
}

/// Serializable description of a URL builder chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UrlBuilderConfig {
    File { url: String },
    ChangeNumber { url: String },
    DefaultIssueTracker { url: String },
    RegexIssueTracker { find: String, replace: String },
    Composite { builders: Vec<UrlBuilderConfig> },
}

impl UrlBuilderConfig {
    pub fn build(&self) -> Result<Box<dyn ModificationUrlBuilder>> {
        Ok(match self {
            UrlBuilderConfig::File { url } => Box::new(FileUrlBuilder::new(url)),
            UrlBuilderConfig::ChangeNumber { url } => Box::new(ChangeNumberUrlBuilder::new(url)),
            UrlBuilderConfig::DefaultIssueTracker { url } => {
                Box::new(DefaultIssueTracker::new(url))
            }
            UrlBuilderConfig::RegexIssueTracker { find, replace } => {
                Box::new(RegexIssueTracker::new(find, replace)?)
            }
            UrlBuilderConfig::Composite { builders } => Box::new(CompositeUrlBuilder::new(
                builders
                    .iter()
                    .map(UrlBuilderConfig::build)
                    .collect::<Result<Vec<_>>>()?,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modification::ModificationKind;
    use chrono::Utc;

    fn sample() -> Vec<Modification> {
        vec![
            Modification::new(ModificationKind::Modified, "src", "main.c", Utc::now())
                .with_change_number("42")
                .with_comment("Fixes BUG-1234 in parser"),
            Modification::new(ModificationKind::Added, "", "README", Utc::now())
                .with_comment("docs only"),
        ]
    }

    #[test]
    fn test_file_url_builder_uses_path() {
        let mut mods = sample();
        FileUrlBuilder::new("http://viewvc/trunk/{0}?view=log").setup_modifications(&mut mods);
        assert_eq!(
            mods[0].url.as_deref(),
            Some("http://viewvc/trunk/src/main.c?view=log")
        );
        assert_eq!(mods[1].url.as_deref(), Some("http://viewvc/trunk/README?view=log"));
    }

    #[test]
    fn test_change_number_builder_skips_missing() {
        let mut mods = sample();
        ChangeNumberUrlBuilder::new("http://websvn/rev/{0}").setup_modifications(&mut mods);
        assert_eq!(mods[0].url.as_deref(), Some("http://websvn/rev/42"));
        assert_eq!(mods[1].url, None);
    }

    #[test]
    fn test_default_issue_tracker_takes_first_number() {
        let mut mods = sample();
        DefaultIssueTracker::new("http://jira/browse/BUG-{0}").setup_modifications(&mut mods);
        assert_eq!(
            mods[0].issue_url.as_deref(),
            Some("http://jira/browse/BUG-1234")
        );
        assert_eq!(mods[1].issue_url, None);
    }

    #[test]
    fn test_regex_issue_tracker_rewrites_match() {
        let mut mods = sample();
        RegexIssueTracker::new(r"BUG-(\d+)", "https://tracker/issue/$1")
            .unwrap()
            .setup_modifications(&mut mods);
        assert_eq!(
            mods[0].issue_url.as_deref(),
            Some("https://tracker/issue/1234")
        );
        assert_eq!(mods[1].issue_url, None);
    }

    #[test]
    fn test_regex_issue_tracker_rejects_bad_pattern() {
        assert!(matches!(
            RegexIssueTracker::new("(unclosed", "x"),
            Err(ScmError::Config(_))
        ));
    }

    #[test]
    fn test_composite_later_builder_wins() {
        let mut mods = sample();
        let composite = CompositeUrlBuilder::new(vec![
            Box::new(FileUrlBuilder::new("http://a/{0}")),
            Box::new(FileUrlBuilder::new("http://b/{0}")),
        ]);
        composite.setup_modifications(&mut mods);
        assert!(mods.iter().all(|m| m.url.as_deref().unwrap().starts_with("http://b/")));
    }

    #[test]
    fn test_composite_preserves_order_across_kinds() {
        let mut mods = sample();
        let composite = CompositeUrlBuilder::new(vec![
            Box::new(ChangeNumberUrlBuilder::new("http://rev/{0}")),
            Box::new(FileUrlBuilder::new("http://file/{0}")),
        ]);
        composite.setup_modifications(&mut mods);
        assert_eq!(mods[0].url.as_deref(), Some("http://file/src/main.c"));

        let mut mods = sample();
        let composite = CompositeUrlBuilder::new(vec![
            Box::new(FileUrlBuilder::new("http://file/{0}")),
            Box::new(ChangeNumberUrlBuilder::new("http://rev/{0}")),
        ]);
        composite.setup_modifications(&mut mods);
        assert_eq!(mods[0].url.as_deref(), Some("http://rev/42"));
        assert_eq!(mods[1].url.as_deref(), Some("http://file/README"));
    }

    #[test]
    fn test_config_builds_nested_composite() {
        let config: UrlBuilderConfig = serde_json::from_value(serde_json::json!({
            "type": "composite",
            "builders": [
                { "type": "file", "url": "http://a/{0}" },
                { "type": "regex_issue_tracker", "find": "BUG-(\\d+)", "replace": "http://t/$1" }
            ]
        }))
        .unwrap();
        let builder = config.build().unwrap();
        let mut mods = sample();
        builder.setup_modifications(&mut mods);
        assert_eq!(mods[0].url.as_deref(), Some("http://a/src/main.c"));
        assert_eq!(mods[0].issue_url.as_deref(), Some("http://t/1234"));
    }
}
