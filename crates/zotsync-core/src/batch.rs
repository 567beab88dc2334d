use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::decision::{format_reason, format_time, label_to_decision};
use crate::matcher::find_candidates;
use crate::normalize::{extract_year, normalize, normalize_identifier};
use crate::store::{Record, RecordStore, StoreError};
use crate::tags::{compute_target_tags, reconcile, strip_review_namespace, TagDiff};
use crate::{ConfigError, DEFAULT_FUZZY_THRESHOLD};

/// One screening-tool row. Missing columns are empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct DecisionRow {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub doi: String,
    #[serde(default, rename = "asreview_label")]
    pub label: String,
    #[serde(default, rename = "asreview_time")]
    pub time: String,
    #[serde(default, rename = "asreview_note")]
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
    fuzzy_threshold: f64,
    dry_run: bool,
}

impl SyncOptions {
    /// # Errors
    /// Returns [`ConfigError::Threshold`] when `fuzzy_threshold` is outside `[0, 1]`.
    pub fn new(fuzzy_threshold: f64, dry_run: bool) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&fuzzy_threshold) {
            return Err(ConfigError::Threshold(fuzzy_threshold));
        }
        Ok(Self { fuzzy_threshold, dry_run })
    }

    #[must_use]
    pub fn fuzzy_threshold(&self) -> f64 {
        self.fuzzy_threshold
    }

    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD, dry_run: false }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct OutcomeReport {
    pub updated: usize,
    pub not_found: usize,
    pub errors: usize,
}

impl OutcomeReport {
    fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::NotFound => self.not_found += 1,
            RowOutcome::Skipped { .. } => {}
            RowOutcome::Applied { updated, errors } => {
                self.updated += updated;
                self.errors += errors;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct CleanReport {
    pub removed: usize,
    pub errors: usize,
}

/// Terminal state of one decision row.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RowOutcome {
    NotFound,
    /// Matched, but the row carries no actionable decision.
    Skipped { candidates: usize },
    Applied { updated: usize, errors: usize },
}

/// Applies screening decisions to a store as review tags.
pub struct Reconciler<'s, S: RecordStore + ?Sized> {
    store: &'s mut S,
    options: SyncOptions,
}

impl<'s, S: RecordStore + ?Sized> Reconciler<'s, S> {
    pub fn new(store: &'s mut S, options: SyncOptions) -> Self {
        Self { store, options }
    }

    /// Run every row and tally the outcome. Row failures never stop the batch.
    pub fn apply_decisions(&mut self, rows: &[DecisionRow]) -> OutcomeReport {
        let mut report = OutcomeReport::default();
        for (index, row) in rows.iter().enumerate() {
            let _span = tracing::debug_span!("row", index).entered();
            report.record(self.apply_row(row));
        }
        info!(
            rows = rows.len(),
            updated = report.updated,
            not_found = report.not_found,
            errors = report.errors,
            dry_run = self.options.dry_run,
            "decision import finished"
        );
        report
    }

    /// Match one row and write its decision tags to every candidate.
    pub fn apply_row(&mut self, row: &DecisionRow) -> RowOutcome {
        let title = normalize(&row.title);
        let year = extract_year(&row.year);
        let identifier = normalize_identifier(&row.doi);
        let identifier = (!identifier.is_empty()).then_some(identifier.as_str());
        debug!(title = %title, year = ?year, identifier = ?identifier, "matching row");

        let candidates = find_candidates(
            &*self.store,
            &title,
            year.as_deref(),
            identifier,
            self.options.fuzzy_threshold,
        );
        if candidates.is_empty() {
            debug!("no candidate records");
            return RowOutcome::NotFound;
        }

        let target = compute_target_tags(
            label_to_decision(&row.label),
            &format_time(&row.time),
            &format_reason(&row.note),
        );
        if target.is_empty() {
            debug!(candidates = candidates.len(), label = %row.label, "no actionable decision; skipping");
            return RowOutcome::Skipped { candidates: candidates.len() };
        }

        if self.options.dry_run {
            return RowOutcome::Applied { updated: candidates.len(), errors: 0 };
        }

        let mut updated = 0;
        let mut errors = 0;
        for candidate in &candidates {
            match self.write_tags(&candidate.record, |current| reconcile(current, &target)) {
                Ok(()) => updated += 1,
                Err(err) => {
                    warn!(key = %candidate.record.key, error = %err, "failed to commit review tags");
                    errors += 1;
                }
            }
        }
        RowOutcome::Applied { updated, errors }
    }

    /// Remove the whole `review:` namespace from every record that carries it.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the tagged records cannot be listed.
    pub fn clean(&mut self) -> Result<CleanReport, StoreError> {
        let records = self.store.list_review_tagged()?;
        let mut report = CleanReport::default();
        for record in &records {
            if self.options.dry_run {
                report.removed += 1;
                continue;
            }
            match self.write_tags(record, strip_review_namespace) {
                Ok(()) => report.removed += 1,
                Err(err) => {
                    warn!(key = %record.key, error = %err, "failed to remove review tags");
                    report.errors += 1;
                }
            }
        }
        info!(
            records = records.len(),
            removed = report.removed,
            errors = report.errors,
            dry_run = self.options.dry_run,
            "review tag cleanup finished"
        );
        Ok(report)
    }

    /// Read-modify-write of one record's tags; unchanged sets are not written.
    fn write_tags<F>(&mut self, record: &Record, next: F) -> Result<(), StoreError>
    where
        F: FnOnce(&BTreeSet<String>) -> BTreeSet<String>,
    {
        let current = self.store.get_tags(record)?;
        let desired = next(&current);
        let diff = TagDiff::between(&current, &desired);
        if diff.is_empty() {
            debug!(key = %record.key, "tags already reconciled");
            return Ok(());
        }
        debug!(key = %record.key, added = diff.added.len(), removed = diff.removed.len(), "committing tags");
        self.store.commit_tags(record, &desired)
    }
}
