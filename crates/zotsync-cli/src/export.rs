use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zotsync_core::{fold, is_review_tag, normalize, reserved_value, resolve_year, Decision, ReservedKey};
use zotsync_store_sqlite::LibraryEntry;

/// One line of the screening-tool import file. Field order is column order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportRow {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_note: String,
    pub authors: String,
    pub keywords: String,
    pub doi: String,
    pub url: String,
    pub year: String,
    pub asreview_label: String,
    pub asreview_time: String,
    pub asreview_note: String,
}

impl ExportRow {
    #[must_use]
    pub fn from_entry(entry: &LibraryEntry) -> Self {
        let decision = reserved_value(&entry.tags, ReservedKey::Decision).and_then(Decision::parse);
        Self {
            title: normalize(&entry.title),
            abstract_note: normalize(&entry.abstract_note),
            authors: entry.authors.iter().map(|name| normalize(name)).collect::<Vec<_>>().join("; "),
            keywords: entry
                .tags
                .iter()
                .filter(|tag| !is_review_tag(tag))
                .map(|tag| normalize(tag))
                .collect::<Vec<_>>()
                .join("; "),
            doi: normalize(&entry.doi),
            url: normalize(&entry.url),
            year: resolve_year(None, entry.date.as_deref()).unwrap_or_default(),
            asreview_label: decision.map(Decision::label).unwrap_or_default().to_string(),
            asreview_time: reserved_value(&entry.tags, ReservedKey::Time).unwrap_or_default().to_string(),
            asreview_note: reserved_value(&entry.tags, ReservedKey::Reason).unwrap_or_default().to_string(),
        }
    }

    /// Duplicate key: the DOI when present, else a short digest of title and year.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, &self.year, &self.doi)
    }
}

#[must_use]
pub fn fingerprint(title: &str, year: &str, doi: &str) -> String {
    let doi = fold(doi);
    if !doi.is_empty() {
        return format!("doi:{doi}");
    }
    let digest = Sha256::digest(format!("{}|{}", fold(title), normalize(year)).as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    format!("tsh:{hex}")
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ExportSummary {
    pub rows: usize,
    pub duplicates: usize,
}

/// Build the rows for `entries`, dropping later duplicates when `dedupe` is set.
#[must_use]
pub fn export_rows(entries: &[LibraryEntry], dedupe: bool) -> (Vec<ExportRow>, usize) {
    let mut seen = HashSet::new();
    let mut duplicates = 0;
    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let row = ExportRow::from_entry(entry);
        if dedupe && !seen.insert(row.fingerprint()) {
            debug!(key = %entry.key, "dropping duplicate entry");
            duplicates += 1;
            continue;
        }
        rows.push(row);
    }
    (rows, duplicates)
}

/// Write `entries` as CSV to `out`, creating parent directories.
///
/// # Errors
/// Returns an error when the file or its directory cannot be written.
pub fn write_export(entries: &[LibraryEntry], out: &Path, dedupe: bool) -> Result<ExportSummary> {
    if let Some(parent) = out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }

    let (rows, duplicates) = export_rows(entries, dedupe);
    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("failed to create export file {}", out.display()))?;
    for row in &rows {
        writer.serialize(row).context("failed to write export row")?;
    }
    if rows.is_empty() {
        writer
            .write_record([
                "title",
                "abstract",
                "authors",
                "keywords",
                "doi",
                "url",
                "year",
                "asreview_label",
                "asreview_time",
                "asreview_note",
            ])
            .context("failed to write export header")?;
    }
    writer.flush().context("failed to flush export file")?;

    info!(path = %out.display(), rows = rows.len(), duplicates, "wrote export");
    Ok(ExportSummary { rows: rows.len(), duplicates })
}
