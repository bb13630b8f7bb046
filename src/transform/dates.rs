use chrono::{Datelike, NaiveDate};

/// Recognized date layouts, tried in order. Month-first comes before
/// day-first so ambiguous values like `03/04/2017` resolve the way the
/// source data (US-style) writes them; day-first still catches values
/// where the first field cannot be a month.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d-%m-%Y",
];

/// Parse a date under any recognized layout. A trailing time-of-day is
/// ignored; quotes and surrounding whitespace are stripped. Returns `None`
/// when no layout matches.
pub fn parse_flexible(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim().trim_matches('"').trim();
    // drop a time component like "2017-03-04 00:00:00" or ISO "T" separator
    let date_part = trimmed
        .split_whitespace()
        .next()?
        .split('T')
        .next()
        .unwrap_or_default();
    if date_part.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// `YYYY-MM` period label for a date.
pub fn year_month_label(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}
