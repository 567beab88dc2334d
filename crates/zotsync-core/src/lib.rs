//! Record matching and review-tag reconciliation between a reference library
//! and screening-tool decision exports.
//!
//! The crate never talks to a concrete store. Everything reads and writes
//! through [`RecordStore`], which the local database and remote API crates
//! implement.

mod batch;
mod decision;
mod matcher;
mod normalize;
mod store;
mod tags;

#[cfg(test)]
mod testing;

pub use batch::{CleanReport, DecisionRow, OutcomeReport, Reconciler, RowOutcome, SyncOptions};
pub use decision::{format_reason, format_time, label_to_decision, Decision};
pub use matcher::{
    find_candidates, title_similarity, years_compatible, Candidate, MatchStrategy, YEAR_BONUS,
};
pub use normalize::{extract_year, fold, normalize, normalize_identifier, resolve_year};
pub use store::{Record, RecordStore, StoreError};
pub use tags::{
    compute_target_tags, is_review_tag, reconcile, reserved_value, strip_review_namespace,
    ReservedKey, TagDiff, REVIEW_NAMESPACE,
};

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.90;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("fuzzy threshold must be within [0, 1], got {0}")]
    Threshold(f64),
    #[error("invalid library type: {0} (expected `users` or `groups`)")]
    LibraryType(String),
}

/// Which library inside a store a run is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryScope {
    User(String),
    Group(String),
}

impl LibraryScope {
    /// Build a scope from the `users`/`groups` path segment and an id.
    ///
    /// # Errors
    /// Returns [`ConfigError::LibraryType`] for any other library type.
    pub fn parse(library_type: &str, library_id: &str) -> Result<Self, ConfigError> {
        match library_type.trim().to_lowercase().as_str() {
            "users" | "user" => Ok(Self::User(library_id.trim().to_string())),
            "groups" | "group" => Ok(Self::Group(library_id.trim().to_string())),
            other => Err(ConfigError::LibraryType(other.to_string())),
        }
    }

    #[must_use]
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::User(_) => "users",
            Self::Group(_) => "groups",
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::Group(id) => id,
        }
    }
}
