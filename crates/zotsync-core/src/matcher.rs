use tracing::{debug, warn};

use crate::normalize::{fold, normalize_identifier};
use crate::store::{Record, RecordStore, StoreError};

/// Added to a fuzzy score when the candidate's year equals the target year.
pub const YEAR_BONUS: f64 = 0.02;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MatchStrategy {
    Identifier,
    TitleYear,
    Fuzzy,
}

impl MatchStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::TitleYear => "title_year",
            Self::Fuzzy => "fuzzy",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub record: Record,
    /// Similarity in `[0, 1]`; exact strategies score `1.0`.
    pub score: f64,
    pub strategy: MatchStrategy,
}

/// Normalized edit-distance similarity of two folded titles, symmetric and in
/// `[0, 1]`.
#[must_use]
pub fn title_similarity(lhs: &str, rhs: &str) -> f64 {
    strsim::normalized_levenshtein(&fold(lhs), &fold(rhs))
}

/// Years agree when equal or when either side is unknown.
#[must_use]
pub fn years_compatible(target: Option<&str>, candidate: Option<&str>) -> bool {
    match (target, candidate) {
        (Some(target), Some(candidate)) => target.eq_ignore_ascii_case(candidate),
        _ => true,
    }
}

/// Find the records a decision row refers to.
///
/// Strategies run in order and the first non-empty result wins: identifier,
/// exact title and year, then fuzzy title similarity at or above `threshold`.
/// Store failures degrade to an empty result for that strategy.
pub fn find_candidates<S: RecordStore + ?Sized>(
    store: &S,
    title: &str,
    year: Option<&str>,
    identifier: Option<&str>,
    threshold: f64,
) -> Vec<Candidate> {
    let target_title = fold(title);
    if target_title.is_empty() {
        return Vec::new();
    }
    let year = year.filter(|value| !value.is_empty());

    if let Some(identifier) = identifier.map(normalize_identifier).filter(|value| !value.is_empty()) {
        let found = by_identifier(store, &identifier);
        if !found.is_empty() {
            debug!(identifier = %identifier, candidates = found.len(), "matched by identifier");
            return found;
        }
    }

    let exact = by_title_year(store, &target_title, year);
    if !exact.is_empty() {
        debug!(candidates = exact.len(), "matched by title and year");
        return exact;
    }

    let fuzzy = by_similarity(store, &target_title, year, threshold);
    debug!(candidates = fuzzy.len(), threshold, "fuzzy title match");
    fuzzy
}

fn by_identifier<S: RecordStore + ?Sized>(store: &S, identifier: &str) -> Vec<Candidate> {
    let records = degrade(store.search_by_identifier(identifier), "identifier");
    records
        .into_iter()
        .filter(|record| {
            record.identifier.as_deref().map(normalize_identifier).as_deref() == Some(identifier)
        })
        .map(|record| Candidate { record, score: 1.0, strategy: MatchStrategy::Identifier })
        .collect()
}

fn by_title_year<S: RecordStore + ?Sized>(
    store: &S,
    target_title: &str,
    year: Option<&str>,
) -> Vec<Candidate> {
    let records = degrade(store.search_by_title_year(target_title, year), "title_year");
    records
        .into_iter()
        .filter(|record| fold(&record.title) == target_title)
        .filter(|record| years_compatible(year, record.year.as_deref()))
        .map(|record| Candidate { record, score: 1.0, strategy: MatchStrategy::TitleYear })
        .collect()
}

fn by_similarity<S: RecordStore + ?Sized>(
    store: &S,
    target_title: &str,
    year: Option<&str>,
    threshold: f64,
) -> Vec<Candidate> {
    let records = degrade(store.search_fuzzy(target_title), "fuzzy");
    let mut scored = records
        .into_iter()
        .filter_map(|record| {
            let candidate_title = fold(&record.title);
            if candidate_title.is_empty() {
                return None;
            }
            let mut score = strsim::normalized_levenshtein(target_title, &candidate_title);
            if year.is_some() && year == record.year.as_deref() {
                score += YEAR_BONUS;
            }
            let score = score.min(1.0);
            (score >= threshold).then_some(Candidate { record, score, strategy: MatchStrategy::Fuzzy })
        })
        .collect::<Vec<_>>();
    // Stable: equal scores keep store order.
    scored.sort_by(|lhs, rhs| rhs.score.total_cmp(&lhs.score));
    scored
}

fn degrade(result: Result<Vec<Record>, StoreError>, strategy: &str) -> Vec<Record> {
    match result {
        Ok(records) => records,
        Err(err) => {
            warn!(strategy, error = %err, "store query failed; treating as no match");
            Vec::new()
        }
    }
}
