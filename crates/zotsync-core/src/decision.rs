use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::normalize::normalize;

const INCLUDED_LABELS: [&str; 6] = ["1", "included", "relevant", "yes", "true", "y"];
const EXCLUDED_LABELS: [&str; 7] = ["0", "-1", "excluded", "irrelevant", "no", "false", "n"];

/// Spreadsheet placeholders that mean "no value".
const MISSING_MARKERS: [&str; 3] = ["nan", "none", "null"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Included,
    Excluded,
}

impl Decision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Included => "included",
            Self::Excluded => "excluded",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "included" => Some(Self::Included),
            "excluded" => Some(Self::Excluded),
            _ => None,
        }
    }

    /// Screening-tool label written on export.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Included => "1",
            Self::Excluded => "0",
        }
    }
}

/// Map a raw screening label to a decision. Unrecognised values yield `None`.
#[must_use]
pub fn label_to_decision(raw: &str) -> Option<Decision> {
    let value = normalize(raw).to_lowercase();
    if INCLUDED_LABELS.contains(&value.as_str()) {
        Some(Decision::Included)
    } else if EXCLUDED_LABELS.contains(&value.as_str()) {
        Some(Decision::Excluded)
    } else {
        None
    }
}

/// Render a raw timestamp as `YYYY-MM-DD HH:MM` in UTC.
///
/// Offsets are converted to UTC and naive timestamps are read as UTC.
/// Anything unparseable renders as the empty string.
#[must_use]
pub fn format_time(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() || is_missing_marker(value) {
        return String::new();
    }
    parse_timestamp(value)
        .and_then(|instant| {
            instant
                .to_offset(UtcOffset::UTC)
                .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
                .ok()
        })
        .unwrap_or_default()
}

/// Normalized free-text reason; placeholder values render empty.
#[must_use]
pub fn format_reason(raw: &str) -> String {
    let value = normalize(raw);
    if is_missing_marker(&value) {
        return String::new();
    }
    value
}

fn is_missing_marker(value: &str) -> bool {
    MISSING_MARKERS.contains(&value.to_lowercase().as_str())
}

fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    parse_with_offset(value)
        .or_else(|| parse_naive(value).map(PrimitiveDateTime::assume_utc))
        .or_else(|| parse_epoch(value))
}

fn parse_with_offset(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .or_else(|| OffsetDateTime::parse(&value.replacen(' ', "T", 1), &Rfc3339).ok())
        .or_else(|| {
            OffsetDateTime::parse(
                value,
                format_description!(
                    "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]] [offset_hour sign:mandatory][offset_minute]"
                ),
            )
            .ok()
        })
}

fn parse_naive(value: &str) -> Option<PrimitiveDateTime> {
    PrimitiveDateTime::parse(
        value,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"),
    )
    .ok()
    .or_else(|| {
        PrimitiveDateTime::parse(
            value,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"),
        )
        .ok()
    })
    .or_else(|| {
        PrimitiveDateTime::parse(value, format_description!("[year]-[month]-[day]T[hour]:[minute]")).ok()
    })
    .or_else(|| {
        PrimitiveDateTime::parse(value, format_description!("[year]-[month]-[day] [hour]:[minute]")).ok()
    })
    .or_else(|| {
        PrimitiveDateTime::parse(value, format_description!("[year]/[month]/[day] [hour]:[minute]:[second]"))
            .ok()
    })
    .or_else(|| {
        PrimitiveDateTime::parse(value, format_description!("[year]/[month]/[day] [hour]:[minute]")).ok()
    })
    .or_else(|| {
        Date::parse(value, format_description!("[year]-[month]-[day]"))
            .ok()
            .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT))
    })
}

/// Unix seconds (10 digits) or milliseconds (13 digits).
fn parse_epoch(value: &str) -> Option<OffsetDateTime> {
    if !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let number: i64 = value.parse().ok()?;
    match value.len() {
        10 => OffsetDateTime::from_unix_timestamp(number).ok(),
        13 => OffsetDateTime::from_unix_timestamp(number / 1000).ok(),
        _ => None,
    }
}
