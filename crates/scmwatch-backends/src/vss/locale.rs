//! Keyword and date vocabulary of a localized `ss.exe`.
//!
//! VSS prints its history in the language of the installed client. The table
//! is built once from configuration and handed to the parser; nothing is read
//! from the host's culture settings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use scmwatch_core::ParsedTimestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VssLocale {
    pub name: String,
    pub version: String,
    pub user: String,
    pub date: String,
    pub time: String,
    pub checked_in: String,
    pub added: String,
    pub deleted: String,
    pub destroyed: String,
    pub label: String,
    pub comment: String,
    /// chrono format of the date column, e.g. `%m/%d/%y`.
    pub date_format: String,
    /// Suffixes on 12-hour times (`10:00a`). Empty for 24-hour clients.
    pub am_designator: String,
    pub pm_designator: String,
}

impl Default for VssLocale {
    fn default() -> Self {
        Self::en_us()
    }
}

impl VssLocale {
    pub fn en_us() -> Self {
        Self {
            name: "en-US".to_string(),
            version: "Version".to_string(),
            user: "User:".to_string(),
            date: "Date:".to_string(),
            time: "Time:".to_string(),
            checked_in: "Checked in".to_string(),
            added: "added".to_string(),
            deleted: "deleted".to_string(),
            destroyed: "destroyed".to_string(),
            label: "Label:".to_string(),
            comment: "Comment:".to_string(),
            date_format: "%m/%d/%y".to_string(),
            am_designator: "a".to_string(),
            pm_designator: "p".to_string(),
        }
    }

    pub fn de_de() -> Self {
        Self {
            name: "de-DE".to_string(),
            version: "Version".to_string(),
            user: "Benutzer:".to_string(),
            date: "Datum:".to_string(),
            time: "Zeit:".to_string(),
            checked_in: "Eingecheckt in".to_string(),
            added: "hinzugefügt".to_string(),
            deleted: "gelöscht".to_string(),
            destroyed: "zerstört".to_string(),
            label: "Bezeichnung:".to_string(),
            comment: "Kommentar:".to_string(),
            date_format: "%d.%m.%y".to_string(),
            am_designator: String::new(),
            pm_designator: String::new(),
        }
    }

    /// Looks up a built-in table by culture name.
    pub fn named(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "en-us" | "en" => Some(Self::en_us()),
            "de-de" | "de" => Some(Self::de_de()),
            _ => None,
        }
    }

    pub fn parse_timestamp(&self, date: &str, time: &str) -> ParsedTimestamp {
        let defaulted = || ParsedTimestamp::Defaulted {
            raw: format!("{} {}", date.trim(), time.trim()),
        };
        let Ok(day) = NaiveDate::parse_from_str(date.trim(), &self.date_format) else {
            return defaulted();
        };
        match self.parse_time(time.trim()) {
            Some(clock) => ParsedTimestamp::Parsed(NaiveDateTime::new(day, clock).and_utc()),
            None => defaulted(),
        }
    }

    fn parse_time(&self, time: &str) -> Option<NaiveTime> {
        let (clock, pm) = match self.strip_designator(time) {
            Some((clock, pm)) => (clock, Some(pm)),
            None => (time, None),
        };
        let parsed = NaiveTime::parse_from_str(clock.trim(), "%H:%M").ok()?;
        match pm {
            None => Some(parsed),
            Some(pm) => {
                let hour = parsed.hour() % 12 + if pm { 12 } else { 0 };
                NaiveTime::from_hms_opt(hour, parsed.minute(), 0)
            }
        }
    }

    fn strip_designator<'a>(&self, time: &'a str) -> Option<(&'a str, bool)> {
        if !self.pm_designator.is_empty() {
            if let Some(clock) = time.strip_suffix(self.pm_designator.as_str()) {
                return Some((clock, true));
            }
        }
        if !self.am_designator.is_empty() {
            if let Some(clock) = time.strip_suffix(self.am_designator.as_str()) {
                return Some((clock, false));
            }
        }
        None
    }

    /// A point in time as `ss history -Vd` expects it.
    pub fn format_command_date(&self, time: DateTime<Utc>) -> String {
        let day = time.format(&self.date_format);
        if self.am_designator.is_empty() && self.pm_designator.is_empty() {
            return format!("{day};{}", time.format("%H:%M"));
        }
        let designator = if time.hour() < 12 {
            &self.am_designator
        } else {
            &self.pm_designator
        };
        format!("{day};{}{designator}", time.format("%I:%M"))
    }
}
