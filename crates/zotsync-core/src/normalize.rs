use std::sync::OnceLock;

use regex_lite::Regex;

/// URL and scheme prefixes that wrap a DOI without changing it.
const IDENTIFIER_PREFIXES: [&str; 6] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "doi:",
];

const YEAR_PATTERN: &str = r"(19|20)\d{2}";

/// Collapse every whitespace run to one space and trim both ends.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// [`normalize`] followed by lower-casing; the comparison form of a title.
#[must_use]
pub fn fold(text: &str) -> String {
    normalize(text).to_lowercase()
}

/// Lower-case an identifier and strip the known DOI URL/scheme prefixes.
#[must_use]
pub fn normalize_identifier(text: &str) -> String {
    let mut value = fold(text);
    while let Some(prefix) = IDENTIFIER_PREFIXES.iter().find(|prefix| value.starts_with(**prefix)) {
        value = value[prefix.len()..].trim_start().to_string();
    }
    value
}

fn year_regex() -> Option<&'static Regex> {
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(YEAR_PATTERN).ok()).as_ref()
}

/// First four-digit 19xx/20xx year found anywhere in `text`.
#[must_use]
pub fn extract_year(text: &str) -> Option<String> {
    let found = year_regex()?.find(text)?;
    Some(found.as_str().to_string())
}

/// Resolve a publication year, preferring the explicit year field over the
/// general date field.
#[must_use]
pub fn resolve_year(explicit: Option<&str>, date: Option<&str>) -> Option<String> {
    explicit.and_then(extract_year).or_else(|| date.and_then(extract_year))
}
