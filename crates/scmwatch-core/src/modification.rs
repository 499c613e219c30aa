//! The canonical change record every history parser produces.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a file in one revision.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    Added,
    Modified,
    Deleted,
    Replaced,
    #[default]
    Unknown,
}

impl ModificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationKind::Added => "added",
            ModificationKind::Modified => "modified",
            ModificationKind::Deleted => "deleted",
            ModificationKind::Replaced => "replaced",
            ModificationKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ModificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "added" => Ok(ModificationKind::Added),
            "modified" => Ok(ModificationKind::Modified),
            "deleted" => Ok(ModificationKind::Deleted),
            "replaced" => Ok(ModificationKind::Replaced),
            "unknown" => Ok(ModificationKind::Unknown),
            other => Err(format!("unknown modification kind: {other}")),
        }
    }
}

/// One changed file between two points in history.
///
/// Paths are forward-slash relative. Equality is structural over every field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Modification {
    pub kind: ModificationKind,
    pub file_name: String,
    pub folder_name: String,
    pub modified_time: DateTime<Utc>,
    pub user_name: String,
    /// Opaque; never used as an ordering key.
    pub change_number: Option<String>,
    pub version: String,
    pub comment: Option<String>,
    pub url: Option<String>,
    pub issue_url: Option<String>,
    pub email_address: Option<String>,
}

impl Modification {
    pub fn new(
        kind: ModificationKind,
        folder_name: impl Into<String>,
        file_name: impl Into<String>,
        modified_time: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            file_name: file_name.into(),
            folder_name: normalize_path(&folder_name.into()),
            modified_time,
            ..Self::default()
        }
    }

    /// Builds a record from a full path, splitting on the last separator.
    pub fn from_path(kind: ModificationKind, path: &str, modified_time: DateTime<Utc>) -> Self {
        let (folder, file) = split_path(path);
        Self::new(kind, folder, file, modified_time)
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_change_number(mut self, change_number: impl Into<String>) -> Self {
        let change_number = change_number.into();
        self.change_number = (!change_number.is_empty()).then_some(change_number);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        self.comment = (!comment.trim().is_empty()).then_some(comment);
        self
    }

    /// `folder/file`, or just `file` when the record sits at the root.
    pub fn path(&self) -> String {
        if self.folder_name.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.folder_name, self.file_name)
        }
    }

    fn key(&self) -> (&str, &str, &str) {
        (&self.folder_name, &self.file_name, &self.version)
    }
}

/// Change number of the most recent record; the first one wins on equal times.
pub fn last_change_number(modifications: &[Modification]) -> Option<String> {
    let mut latest: Option<&Modification> = None;
    for modification in modifications {
        match latest {
            Some(current) if modification.modified_time <= current.modified_time => {}
            _ => latest = Some(modification),
        }
    }
    latest.and_then(|m| m.change_number.clone())
}

/// Records of `current` whose `(folder, file, version)` is absent from `baseline`.
pub fn diff_modifications(current: &[Modification], baseline: &[Modification]) -> Vec<Modification> {
    let known: HashSet<(&str, &str, &str)> = baseline.iter().map(Modification::key).collect();
    current
        .iter()
        .filter(|m| !known.contains(&m.key()))
        .cloned()
        .collect()
}

/// Removes a repository-root prefix from every record's folder.
pub fn strip_folder_root(modifications: &mut [Modification], root: &str) {
    let root = normalize_path(root);
    if root.is_empty() {
        return;
    }
    for modification in modifications.iter_mut() {
        if modification.folder_name == root {
            modification.folder_name.clear();
        } else if let Some(rest) = modification
            .folder_name
            .strip_prefix(&root)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            modification.folder_name = rest.to_string();
        }
    }
}

/// Forward slashes, no duplicate separators, no leading or trailing slash.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits a path into `(folder, file)` after normalising separators.
pub fn split_path(path: &str) -> (String, String) {
    let normalized = normalize_path(path);
    match normalized.rsplit_once('/') {
        Some((folder, file)) => (folder.to_string(), file.to_string()),
        None => (String::new(), normalized),
    }
}
