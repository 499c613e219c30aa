//! Accept/reject filters over modifications.
//!
//! Typical use: keep commits made by automation accounts from triggering
//! builds, or only react to changes under certain paths.

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScmError};
use crate::modification::{Modification, ModificationKind};

pub trait ModificationFilter: Send + Sync {
    fn accept(&self, modification: &Modification) -> bool;
}

/// Matches records whose user name is exactly one of `user_names`.
#[derive(Debug, Clone)]
pub struct UserFilter {
    user_names: Vec<String>,
}

impl UserFilter {
    pub fn new<I, S>(user_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_names: user_names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ModificationFilter for UserFilter {
    fn accept(&self, modification: &Modification) -> bool {
        self.user_names.iter().any(|u| *u == modification.user_name)
    }
}

/// Matches records whose `folder/file` path matches a glob (`*`, `**`, `?`).
#[derive(Debug, Clone)]
pub struct PathFilter {
    matcher: GlobMatcher,
}

impl PathFilter {
    pub fn new(pattern: &str, case_sensitive: bool) -> Result<Self> {
        let glob = GlobBuilder::new(pattern.trim_start_matches('/'))
            .case_insensitive(!case_sensitive)
            .literal_separator(true)
            .build()
            .map_err(|e| ScmError::Config(format!("invalid path pattern {pattern:?}: {e}")))?;
        Ok(Self {
            matcher: glob.compile_matcher(),
        })
    }
}

impl ModificationFilter for PathFilter {
    fn accept(&self, modification: &Modification) -> bool {
        self.matcher.is_match(modification.path())
    }
}

/// Matches records of the given kinds.
#[derive(Debug, Clone)]
pub struct ActionFilter {
    kinds: Vec<ModificationKind>,
}

impl ActionFilter {
    pub fn new(kinds: Vec<ModificationKind>) -> Self {
        Self { kinds }
    }
}

impl ModificationFilter for ActionFilter {
    fn accept(&self, modification: &Modification) -> bool {
        self.kinds.contains(&modification.kind)
    }
}

/// Matches records whose comment matches a regular expression.
#[derive(Debug, Clone)]
pub struct CommentFilter {
    pattern: Regex,
}

impl CommentFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ScmError::Config(format!("invalid comment pattern {pattern:?}: {e}")))?;
        Ok(Self { pattern })
    }
}

impl ModificationFilter for CommentFilter {
    fn accept(&self, modification: &Modification) -> bool {
        modification
            .comment
            .as_deref()
            .is_some_and(|c| self.pattern.is_match(c))
    }
}

/// Inclusion and exclusion filters applied together.
///
/// A record is kept when it matches at least one inclusion (or there are no
/// inclusions) and matches no exclusion.
#[derive(Default)]
pub struct FilterSet {
    inclusions: Vec<Box<dyn ModificationFilter>>,
    exclusions: Vec<Box<dyn ModificationFilter>>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, filter: Box<dyn ModificationFilter>) -> Self {
        self.inclusions.push(filter);
        self
    }

    pub fn exclude(mut self, filter: Box<dyn ModificationFilter>) -> Self {
        self.exclusions.push(filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inclusions.is_empty() && self.exclusions.is_empty()
    }

    pub fn accept(&self, modification: &Modification) -> bool {
        let included =
            self.inclusions.is_empty() || self.inclusions.iter().any(|f| f.accept(modification));
        included && !self.exclusions.iter().any(|f| f.accept(modification))
    }

    pub fn apply(&self, modifications: Vec<Modification>) -> Vec<Modification> {
        if self.is_empty() {
            return modifications;
        }
        let before = modifications.len();
        let kept: Vec<Modification> = modifications
            .into_iter()
            .filter(|m| self.accept(m))
            .collect();
        tracing::debug!(before = before, after = kept.len(), "filtered modifications");
        kept
    }
}

/// Serializable description of one filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    User {
        names: Vec<String>,
    },
    Path {
        pattern: String,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
    Action {
        actions: Vec<ModificationKind>,
    },
    Comment {
        pattern: String,
    },
}

fn default_case_sensitive() -> bool {
    true
}

impl FilterConfig {
    pub fn build(&self) -> Result<Box<dyn ModificationFilter>> {
        Ok(match self {
            FilterConfig::User { names } => Box::new(UserFilter::new(names.iter().cloned())),
            FilterConfig::Path {
                pattern,
                case_sensitive,
            } => Box::new(PathFilter::new(pattern, *case_sensitive)?),
            FilterConfig::Action { actions } => Box::new(ActionFilter::new(actions.clone())),
            FilterConfig::Comment { pattern } => Box::new(CommentFilter::new(pattern)?),
        })
    }
}

/// Builds a [`FilterSet`] from inclusion and exclusion configs.
pub fn build_filter_set(include: &[FilterConfig], exclude: &[FilterConfig]) -> Result<FilterSet> {
    let mut set = FilterSet::new();
    for config in include {
        set = set.include(config.build()?);
    }
    for config in exclude {
        set = set.exclude(config.build()?);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn by(user: &str, folder: &str, file: &str) -> Modification {
        Modification::new(ModificationKind::Modified, folder, file, Utc::now()).with_user(user)
    }

    #[test]
    fn test_user_filter_exact_match() {
        let filter = UserFilter::new(["buildbot", "release"]);
        assert!(filter.accept(&by("buildbot", "src", "a.c")));
        assert!(!filter.accept(&by("BuildBot", "src", "a.c")));
        assert!(!filter.accept(&by("buildbot2", "src", "a.c")));
    }

    #[test]
    fn test_exclusion_drops_automation_commits() {
        let set = FilterSet::new().exclude(Box::new(UserFilter::new(["buildbot"])));
        let kept = set.apply(vec![by("alice", "src", "a.c"), by("buildbot", "src", "b.c")]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].user_name, "alice");
    }

    #[test]
    fn test_path_filter_globs() {
        let filter = PathFilter::new("src/**/*.rs", true).unwrap();
        assert!(filter.accept(&by("a", "src/core", "lib.rs")));
        assert!(!filter.accept(&by("a", "docs", "lib.rs")));

        let filter = PathFilter::new("/docs/*", false).unwrap();
        assert!(filter.accept(&by("a", "DOCS", "index.md")));
        assert!(!filter.accept(&by("a", "docs/api", "index.md")));
    }

    #[test]
    fn test_inclusion_and_exclusion_combine() {
        let set = FilterSet::new()
            .include(Box::new(PathFilter::new("src/**", true).unwrap()))
            .exclude(Box::new(CommentFilter::new(r"\[skip ci\]").unwrap()));
        let skip = by("alice", "src", "a.c").with_comment("tidy [skip ci]");
        let keep = by("alice", "src", "b.c").with_comment("real change");
        let outside = by("alice", "docs", "c.md");
        let kept = set.apply(vec![skip, keep.clone(), outside]);
        assert_eq!(kept, vec![keep]);
    }

    #[test]
    fn test_action_filter() {
        let filter = ActionFilter::new(vec![ModificationKind::Deleted]);
        let mut m = by("a", "", "x");
        assert!(!filter.accept(&m));
        m.kind = ModificationKind::Deleted;
        assert!(filter.accept(&m));
    }

    #[test]
    fn test_filter_config_from_json() {
        let configs: Vec<FilterConfig> = serde_json::from_value(serde_json::json!([
            { "type": "user", "names": ["ci"] },
            { "type": "path", "pattern": "*.txt" },
            { "type": "action", "actions": ["added", "deleted"] }
        ]))
        .unwrap();
        let set = build_filter_set(&[], &configs).unwrap();
        assert!(!set.accept(&by("ci", "src", "a.c")));
        assert!(!set.accept(&by("bob", "", "notes.txt")));
        assert!(set.accept(&by("bob", "src", "a.c")));
    }
}
