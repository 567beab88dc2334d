use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use crate::normalize::{fold, normalize_identifier};
use crate::store::{Record, RecordStore, StoreError};
use crate::tags::is_review_tag;

pub(crate) fn record(key: &str, title: &str, year: Option<&str>) -> Record {
    Record {
        key: key.to_string(),
        version: Some(1),
        title: title.to_string(),
        year: year.map(ToString::to_string),
        identifier: None,
        tags: BTreeSet::new(),
        tag_types: BTreeMap::new(),
    }
}

/// In-memory store recording every search and commit.
pub(crate) struct MemoryStore {
    pub(crate) records: Vec<Record>,
    pub(crate) commits: Vec<(String, BTreeSet<String>)>,
    rejected_keys: BTreeSet<String>,
    fail_searches: bool,
    searches: Cell<usize>,
}

impl MemoryStore {
    pub(crate) fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            commits: Vec::new(),
            rejected_keys: BTreeSet::new(),
            fail_searches: false,
            searches: Cell::new(0),
        }
    }

    pub(crate) fn failing_searches(mut self) -> Self {
        self.fail_searches = true;
        self
    }

    pub(crate) fn rejecting(mut self, key: &str) -> Self {
        self.rejected_keys.insert(key.to_string());
        self
    }

    pub(crate) fn search_calls(&self) -> usize {
        self.searches.get()
    }

    pub(crate) fn tags_of(&self, key: &str) -> BTreeSet<String> {
        self.records
            .iter()
            .find(|record| record.key == key)
            .map(|record| record.tags.clone())
            .unwrap_or_default()
    }

    fn search(&self, keep: impl Fn(&Record) -> bool) -> Result<Vec<Record>, StoreError> {
        self.searches.set(self.searches.get() + 1);
        if self.fail_searches {
            return Err(StoreError::Unreachable("connection refused".to_string()));
        }
        Ok(self.records.iter().filter(|record| keep(record)).cloned().collect())
    }
}

impl RecordStore for MemoryStore {
    fn search_by_identifier(&self, identifier: &str) -> Result<Vec<Record>, StoreError> {
        let wanted = normalize_identifier(identifier);
        self.search(|record| {
            record.identifier.as_deref().map(normalize_identifier).as_deref() == Some(wanted.as_str())
        })
    }

    fn search_by_title_year(&self, title: &str, _year: Option<&str>) -> Result<Vec<Record>, StoreError> {
        let wanted = fold(title);
        self.search(|record| fold(&record.title) == wanted)
    }

    fn search_fuzzy(&self, _title: &str) -> Result<Vec<Record>, StoreError> {
        self.search(|_| true)
    }

    fn get_tags(&self, record: &Record) -> Result<BTreeSet<String>, StoreError> {
        self.records
            .iter()
            .find(|stored| stored.key == record.key)
            .map(|stored| stored.tags.clone())
            .ok_or_else(|| StoreError::MissingRecord(record.key.clone()))
    }

    fn commit_tags(&mut self, record: &Record, tags: &BTreeSet<String>) -> Result<(), StoreError> {
        if self.rejected_keys.contains(&record.key) {
            return Err(StoreError::Rejected { status: 412, message: "stale version".to_string() });
        }
        let stored = self
            .records
            .iter_mut()
            .find(|stored| stored.key == record.key)
            .ok_or_else(|| StoreError::MissingRecord(record.key.clone()))?;
        stored.tags.clone_from(tags);
        self.commits.push((record.key.clone(), tags.clone()));
        Ok(())
    }

    fn list_review_tagged(&self) -> Result<Vec<Record>, StoreError> {
        self.search(|record| record.tags.iter().any(|tag| is_review_tag(tag)))
    }
}
