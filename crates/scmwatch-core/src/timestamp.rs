//! Timestamp parsing with an observable fallback.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Outcome of parsing a backend timestamp.
///
/// Some tools print dates a parser cannot always read. Instead of silently
/// substituting a sentinel, the parser returns `Defaulted` so the caller can
/// see that the record carries no real time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedTimestamp {
    Parsed(DateTime<Utc>),
    Defaulted { raw: String },
}

impl ParsedTimestamp {
    /// Parses `raw` with each chrono format in turn, interpreting the result as UTC.
    pub fn parse_naive(raw: &str, formats: &[&str]) -> Self {
        let trimmed = raw.trim();
        formats
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
            .map(|naive| ParsedTimestamp::Parsed(naive.and_utc()))
            .unwrap_or_else(|| ParsedTimestamp::Defaulted {
                raw: raw.to_string(),
            })
    }

    /// The parsed time, or `DateTime::<Utc>::MIN_UTC` for a defaulted one.
    pub fn value(&self) -> DateTime<Utc> {
        match self {
            ParsedTimestamp::Parsed(time) => *time,
            ParsedTimestamp::Defaulted { .. } => DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, ParsedTimestamp::Defaulted { .. })
    }

    pub fn parsed(&self) -> Option<DateTime<Utc>> {
        match self {
            ParsedTimestamp::Parsed(time) => Some(*time),
            ParsedTimestamp::Defaulted { .. } => None,
        }
    }
}

/// Whether `time` falls inside the inclusive window `[from, to]`.
pub fn within_window(time: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    from <= time && time <= to
}
