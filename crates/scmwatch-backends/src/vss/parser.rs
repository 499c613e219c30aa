//! `ss history -R` output, keyword-driven through a [`VssLocale`].
//!
//! Entries start at a line of asterisks. An item header names the file or
//! project (`*****  Foo.cs  *****`) and is followed by `Version N`; further
//! versions of the same item use `*****  Version N  *****`.

use chrono::{DateTime, Utc};

use scmwatch_core::{
    HistoryParser, Modification, ModificationKind, ParsedTimestamp, RecordPolicy, Result, ScmError,
};

use super::locale::VssLocale;
use super::BACKEND;

/// One reported history entry and how its timestamp was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VssEntry {
    pub modification: Modification,
    pub timestamp: ParsedTimestamp,
}

#[derive(Debug, Clone, Default)]
pub struct VssHistoryParser {
    locale: VssLocale,
    policy: RecordPolicy,
}

impl VssHistoryParser {
    pub fn new(locale: VssLocale, policy: RecordPolicy) -> Self {
        Self { locale, policy }
    }

    /// Parse every entry, keeping defaulted timestamps visible to the caller.
    pub fn parse_entries(&self, raw: &str) -> Result<Vec<VssEntry>> {
        let mut entries = Vec::new();
        let mut item = String::new();
        for block in blocks(raw) {
            let header = block[0].trim().trim_matches('*').trim();
            let (version, body) = match self.version_number(header) {
                Some(version) => (version.to_string(), &block[1..]),
                None => {
                    item = header.to_string();
                    let version = block
                        .get(1)
                        .and_then(|line| self.version_number(line.trim()))
                        .map(str::to_string)
                        .unwrap_or_default();
                    (version, block.get(2..).unwrap_or_default())
                }
            };
            if let Some(Some(entry)) = self.policy.handle(self.parse_entry(&item, &version, body))? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn parse_entry(&self, item: &str, version: &str, body: &[&str]) -> Result<Option<VssEntry>> {
        let locale = &self.locale;
        let fragment = || body.join("\n");

        let user_index = body
            .iter()
            .position(|line| line.trim_start().starts_with(locale.user.as_str()))
            .ok_or_else(|| ScmError::record(BACKEND, "entry without user line", fragment()))?;
        let (user, date, time) = self
            .user_line(body[user_index])
            .ok_or_else(|| ScmError::record(BACKEND, "unreadable user line", fragment()))?;

        let rest = &body[user_index + 1..];
        let Some(action) = rest.iter().map(|line| line.trim()).find(|line| !line.is_empty()) else {
            return Err(ScmError::record(BACKEND, "entry without action", fragment()));
        };

        let (kind, folder, file) = if action.starts_with(locale.label.as_str()) {
            return Ok(None);
        } else if let Some(folder) = action.strip_prefix(locale.checked_in.as_str()) {
            (ModificationKind::Modified, folder.trim().to_string(), item.to_string())
        } else if let Some((name, kind)) = self.project_action(action) {
            if kind == ModificationKind::Added && name.starts_with('$') {
                // A sub-project shared into this one, not a file.
                return Ok(None);
            }
            (kind, item.to_string(), name.trim_start_matches('$').to_string())
        } else {
            tracing::debug!(backend = BACKEND, action = %action, "ignoring unsupported history action");
            return Ok(None);
        };

        let timestamp = locale.parse_timestamp(date, time);
        if let ParsedTimestamp::Defaulted { raw } = &timestamp {
            tracing::warn!(backend = BACKEND, raw = %raw, file = %file, "unparseable date, using minimum time");
        }

        let modification = Modification::new(kind, folder, file, timestamp.value())
            .with_user(user)
            .with_version(version)
            .with_comment(self.comment(rest));
        Ok(Some(VssEntry {
            modification,
            timestamp,
        }))
    }

    /// `Version 12` yields `12`; an item named `VersionInfo.cs` yields nothing.
    fn version_number<'a>(&self, text: &'a str) -> Option<&'a str> {
        let rest = text.strip_prefix(self.locale.version.as_str())?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let number = rest.trim();
        (!number.is_empty() && number.chars().all(|c| c.is_ascii_digit())).then_some(number)
    }

    /// `User: Alice   Date:  1/02/20   Time: 10:00a`
    fn user_line<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str, &'a str)> {
        let locale = &self.locale;
        let after_user = line.trim_start().strip_prefix(locale.user.as_str())?;
        let (user, after_date) = after_user.split_once(locale.date.as_str())?;
        let (date, time) = after_date.split_once(locale.time.as_str())?;
        Some((user.trim(), date.trim(), time.trim()))
    }

    /// `Bar.cs added`, `Bar.cs deleted`, `Bar.cs destroyed`
    fn project_action<'a>(&self, action: &'a str) -> Option<(&'a str, ModificationKind)> {
        let locale = &self.locale;
        [
            (&locale.added, ModificationKind::Added),
            (&locale.deleted, ModificationKind::Deleted),
            (&locale.destroyed, ModificationKind::Deleted),
        ]
        .into_iter()
        .find_map(|(keyword, kind)| {
            action
                .strip_suffix(keyword.as_str())
                .filter(|name| name.ends_with(' '))
                .map(|name| (name.trim(), kind))
        })
    }

    fn comment(&self, rest: &[&str]) -> String {
        let Some(start) = rest
            .iter()
            .position(|line| line.trim_start().starts_with(self.locale.comment.as_str()))
        else {
            return String::new();
        };
        let first = rest[start]
            .trim_start()
            .trim_start_matches(self.locale.comment.as_str())
            .trim();
        std::iter::once(first)
            .chain(rest[start + 1..].iter().map(|line| line.trim_end()))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }
}

impl HistoryParser for VssHistoryParser {
    /// The `-Vd` range on the command line bounds the history; entries are not
    /// re-filtered, so a defaulted timestamp cannot hide a change.
    fn parse(&self, raw: &str, _from: DateTime<Utc>, _to: DateTime<Utc>) -> Result<Vec<Modification>> {
        Ok(self
            .parse_entries(raw)?
            .into_iter()
            .map(|entry| entry.modification)
            .collect())
    }
}

fn is_header(line: &str) -> bool {
    line.trim_start().starts_with("*****")
}

fn blocks(raw: &str) -> Vec<Vec<&str>> {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    for line in raw.lines() {
        if is_header(line) {
            blocks.push(vec![line]);
        } else if let Some(block) = blocks.last_mut() {
            block.push(line);
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HISTORY: &str = "\
Building list for $/Proj......

*****  Foo.cs  *****
Version 3
User: Alice        Date:  1/02/20   Time: 10:00a
Checked in $/Proj/src
Comment: fixed the
  off-by-one

*****  $/Proj/src  *****
Version 5
User: Bob          Date:  1/03/20   Time:  2:15p
Bar.cs added

*****************  Version 6   *****************
User: Bob          Date:  1/03/20   Time:  2:16p
$Shared added

*****************  Version 7   *****************
User: Bob          Date:  1/03/20   Time:  2:17p
Label: \"release-1\"
Label comment: shipped

*****************  Version 8   *****************
User: Carol        Date:  1/04/20   Time:  9:00a
Old.cs destroyed
";

    fn parser() -> VssHistoryParser {
        VssHistoryParser::default()
    }

    #[test]
    fn test_entries_parsed_and_sigil_add_dropped() {
        let entries = parser().parse_entries(HISTORY).unwrap();
        let mods: Vec<&Modification> = entries.iter().map(|e| &e.modification).collect();
        assert_eq!(mods.len(), 3);

        assert_eq!(mods[0].kind, ModificationKind::Modified);
        assert_eq!(mods[0].folder_name, "$/Proj/src");
        assert_eq!(mods[0].file_name, "Foo.cs");
        assert_eq!(mods[0].version, "3");
        assert_eq!(mods[0].user_name, "Alice");
        assert_eq!(mods[0].comment.as_deref(), Some("fixed the\n  off-by-one"));
        assert_eq!(
            mods[0].modified_time,
            Utc.with_ymd_and_hms(2020, 1, 2, 10, 0, 0).unwrap()
        );

        assert_eq!(mods[1].kind, ModificationKind::Added);
        assert_eq!(mods[1].file_name, "Bar.cs");
        assert_eq!(mods[1].folder_name, "$/Proj/src");

        assert_eq!(mods[2].kind, ModificationKind::Deleted);
        assert_eq!(mods[2].file_name, "Old.cs");
        assert_eq!(mods[2].version, "8");

        assert!(mods
            .iter()
            .all(|m| !(m.kind == ModificationKind::Added && m.file_name.starts_with('$'))));
        assert!(!mods.iter().any(|m| m.file_name.contains("Shared")));
    }

    #[test]
    fn test_item_named_like_version_keyword_is_its_own_file() {
        let raw = "\
*****  Foo.cs  *****
Version 3
User: Alice        Date:  1/02/20   Time: 10:00a
Checked in $/Proj/src

*****  VersionInfo.cs  *****
Version 7
User: Bob          Date:  1/03/20   Time:  2:15p
Checked in $/Proj/src

*****************  Version 8   *****************
User: Bob          Date:  1/03/20   Time:  2:20p
Checked in $/Proj/src
";
        let entries = parser().parse_entries(raw).unwrap();
        let files: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.modification.file_name.as_str(), e.modification.version.as_str()))
            .collect();
        assert_eq!(
            files,
            vec![("Foo.cs", "3"), ("VersionInfo.cs", "7"), ("VersionInfo.cs", "8")]
        );
    }

    #[test]
    fn test_defaulted_timestamp_is_observable() {
        let raw = "\
*****  Foo.cs  *****
Version 4
User: Alice        Date:  2020-01-02   Time: 10:00a
Checked in $/Proj
";
        let entries = parser().parse_entries(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].timestamp.is_defaulted());
        assert_eq!(entries[0].modification.modified_time, DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_missing_user_line_policy() {
        let raw = "\
*****  Foo.cs  *****
Version 4
Checked in $/Proj
";
        assert!(matches!(
            parser().parse_entries(raw),
            Err(ScmError::Record { .. })
        ));
        let skip = VssHistoryParser::new(VssLocale::en_us(), RecordPolicy::Skip);
        assert!(skip.parse_entries(raw).unwrap().is_empty());
    }

    #[test]
    fn test_localized_keywords() {
        let raw = "\
*****  Foo.cs  *****
Version 2
Benutzer: Jan     Datum: 03.01.20   Zeit: 17:45
Eingecheckt in $/Projekt
Kommentar: Fehler behoben
";
        let parser = VssHistoryParser::new(VssLocale::de_de(), RecordPolicy::Fail);
        let (from, to) = (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC);
        let mods = parser.parse(raw, from, to).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].user_name, "Jan");
        assert_eq!(mods[0].folder_name, "$/Projekt");
        assert_eq!(mods[0].comment.as_deref(), Some("Fehler behoben"));
        assert_eq!(
            mods[0].modified_time,
            Utc.with_ymd_and_hms(2020, 1, 3, 17, 45, 0).unwrap()
        );
    }
}
