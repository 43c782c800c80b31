//! Canonical date helpers.
//!
//! Every table in the pipeline uses `YYYY-MM-DD` dates. Parsing is strict:
//! anything else is treated as a malformed value and yields `None`.

use chrono::{Datelike, NaiveDate};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` string, ignoring surrounding whitespace.
pub fn to_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT).ok()
}

/// Format a date as `YYYY-MM-DD`.
pub fn date_to_str(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Format a date as `YYYYMM`, as used by monthly statistics APIs.
pub fn yyyymm(d: NaiveDate) -> String {
    format!("{:04}{:02}", d.year(), d.month())
}
