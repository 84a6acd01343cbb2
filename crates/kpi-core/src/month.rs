use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};

// ── Month ─────────────────────────────────────────────────────────────────────

/// A calendar month bucket.
///
/// `Unknown` holds rows whose date could not be parsed. It orders after every
/// known month and serialises as an empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Month {
    /// First day of the month.
    Known(NaiveDate),
    Unknown,
}

impl Month {
    /// Month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        // Day 1 exists in every month, so `with_day(1)` cannot fail.
        Month::Known(date.with_day(1).unwrap_or(date))
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Month::Known(_))
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Month::Known(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Month::Unknown => Ok(()),
        }
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Month::Known(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            Month::Unknown => serializer.serialize_none(),
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parse a raw date cell into its calendar date.
///
/// Offsets in RFC 3339 values are not converted: the calendar date written in
/// the value is the one returned. Returns `None` for empty or unrecognised
/// input.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    // Offset-bearing values: keep the local calendar date of the stated offset.
    let normalised = match s.strip_suffix('Z') {
        Some(stripped) => format!("{}+00:00", stripped),
        None => s.to_string(),
    };
    DateTime::parse_from_rfc3339(&normalised)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Truncate a raw date cell to its month bucket.
pub fn truncate_to_month(raw: Option<&str>) -> Month {
    raw.and_then(parse_date)
        .map(Month::of)
        .unwrap_or(Month::Unknown)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
