use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::debug;
use zotsync_core::DecisionRow;

/// Column names accepted for each row field, first hit wins.
const TITLE_COLUMNS: &[&str] = &["title", "primary_title"];
const YEAR_COLUMNS: &[&str] = &["year", "publication_year"];
const DOI_COLUMNS: &[&str] = &["doi", "identifier"];
const LABEL_COLUMNS: &[&str] = &["asreview_label", "included", "label_included"];
const TIME_COLUMNS: &[&str] = &["asreview_time"];
const NOTE_COLUMNS: &[&str] = &["asreview_note"];

struct ColumnMap {
    title: Option<usize>,
    year: Option<usize>,
    doi: Option<usize>,
    label: Option<usize>,
    time: Option<usize>,
    note: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Self {
        let names = headers
            .iter()
            .map(|name| name.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
            .collect::<Vec<_>>();
        let find = |aliases: &[&str]| {
            aliases.iter().find_map(|alias| names.iter().position(|name| name == alias))
        };
        Self {
            title: find(TITLE_COLUMNS),
            year: find(YEAR_COLUMNS),
            doi: find(DOI_COLUMNS),
            label: find(LABEL_COLUMNS),
            time: find(TIME_COLUMNS),
            note: find(NOTE_COLUMNS),
        }
    }

    fn row(&self, record: &StringRecord) -> DecisionRow {
        let cell = |index: Option<usize>| {
            index.and_then(|index| record.get(index)).unwrap_or_default().to_string()
        };
        DecisionRow {
            title: cell(self.title),
            year: cell(self.year),
            doi: cell(self.doi),
            label: cell(self.label),
            time: cell(self.time),
            note: cell(self.note),
        }
    }
}

/// Read screening decisions from a CSV export. Missing columns read as empty
/// cells; short rows are padded.
///
/// # Errors
/// Returns an error when the file cannot be opened or is not valid CSV.
pub fn read_decision_rows(path: &Path) -> Result<Vec<DecisionRow>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("failed to open decision file {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .clone();
    let columns = ColumnMap::from_headers(&headers);

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("failed to read row {} of {}", index + 1, path.display()))?;
        rows.push(columns.row(&record));
    }
    debug!(path = %path.display(), rows = rows.len(), "read decision rows");
    Ok(rows)
}
