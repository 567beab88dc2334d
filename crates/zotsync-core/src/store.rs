use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A bibliographic entry as seen through a [`RecordStore`]. Only `tags` is
/// ever written back.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    /// Store-specific item key.
    pub key: String,
    /// Optimistic-concurrency version, where the store has one.
    pub version: Option<u64>,
    pub title: String,
    /// Resolved four-digit publication year.
    pub year: Option<String>,
    /// External identifier (DOI), as stored.
    pub identifier: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Store-assigned type of tags that are not plain manual tags
    /// (Zotero: 1 = automatic). Written back unchanged for kept tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tag_types: BTreeMap<String, u8>,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("store rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("version conflict on record {key} (version {version})")]
    Conflict { key: String, version: u64 },
    #[error("record not found: {0}")]
    MissingRecord(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Read/write contract shared by the local database and the remote API.
///
/// Search methods return candidate pools; ranking and final filtering belong
/// to the matcher. `commit_tags` replaces the record's whole tag set and must
/// be all-or-nothing per record.
pub trait RecordStore {
    /// Records whose normalized identifier equals `identifier`.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the store cannot be queried.
    fn search_by_identifier(&self, identifier: &str) -> Result<Vec<Record>, StoreError>;

    /// Records with the given title, constrained by `year` where the store can.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the store cannot be queried.
    fn search_by_title_year(&self, title: &str, year: Option<&str>) -> Result<Vec<Record>, StoreError>;

    /// Broad, unranked pool of records related to `title`.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the store cannot be queried.
    fn search_fuzzy(&self, title: &str) -> Result<Vec<Record>, StoreError>;

    /// Current tag set of `record`.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the record cannot be read.
    fn get_tags(&self, record: &Record) -> Result<BTreeSet<String>, StoreError>;

    /// Replace the tag set of `record` with `tags`.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the write is rejected; nothing is applied.
    fn commit_tags(&mut self, record: &Record, tags: &BTreeSet<String>) -> Result<(), StoreError>;

    /// Every record carrying at least one `review:` tag.
    ///
    /// # Errors
    /// Returns a [`StoreError`] when the store cannot be queried.
    fn list_review_tagged(&self) -> Result<Vec<Record>, StoreError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn search_by_identifier(&self, identifier: &str) -> Result<Vec<Record>, StoreError> {
        (**self).search_by_identifier(identifier)
    }

    fn search_by_title_year(&self, title: &str, year: Option<&str>) -> Result<Vec<Record>, StoreError> {
        (**self).search_by_title_year(title, year)
    }

    fn search_fuzzy(&self, title: &str) -> Result<Vec<Record>, StoreError> {
        (**self).search_fuzzy(title)
    }

    fn get_tags(&self, record: &Record) -> Result<BTreeSet<String>, StoreError> {
        (**self).get_tags(record)
    }

    fn commit_tags(&mut self, record: &Record, tags: &BTreeSet<String>) -> Result<(), StoreError> {
        (**self).commit_tags(record, tags)
    }

    fn list_review_tagged(&self) -> Result<Vec<Record>, StoreError> {
        (**self).list_review_tagged()
    }
}
