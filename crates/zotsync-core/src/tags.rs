use std::collections::BTreeSet;

use crate::decision::Decision;

pub const REVIEW_NAMESPACE: &str = "review";

/// Keys owned by the review-decision contract. At most one tag per key may
/// exist on a record after reconciliation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ReservedKey {
    Decision,
    Time,
    Reason,
}

impl ReservedKey {
    pub const ALL: [Self; 3] = [Self::Decision, Self::Time, Self::Reason];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Decision => "Decision",
            Self::Time => "Time",
            Self::Reason => "Reason",
        }
    }

    /// `review:<Key>=`
    #[must_use]
    pub fn prefix(self) -> String {
        format!("{REVIEW_NAMESPACE}:{}=", self.as_str())
    }

    #[must_use]
    pub fn tag(self, value: &str) -> String {
        format!("{}{value}", self.prefix())
    }

    /// The reserved key a tag is filed under, if any.
    #[must_use]
    pub fn of(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| tag.starts_with(&key.prefix()))
    }
}

#[must_use]
pub fn is_review_tag(tag: &str) -> bool {
    tag.strip_prefix(REVIEW_NAMESPACE).is_some_and(|rest| rest.starts_with(':'))
}

/// Value of the first tag filed under `key`.
#[must_use]
pub fn reserved_value<'a, I>(tags: I, key: ReservedKey) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    let prefix = key.prefix();
    tags.into_iter().find_map(|tag| tag.strip_prefix(prefix.as_str()))
}

/// Reserved tags a record must carry after applying a decision. Empty when
/// there is no decision; time and reason are only emitted when non-empty.
#[must_use]
pub fn compute_target_tags(decision: Option<Decision>, time: &str, reason: &str) -> BTreeSet<String> {
    let mut target = BTreeSet::new();
    let Some(decision) = decision else {
        return target;
    };
    target.insert(ReservedKey::Decision.tag(decision.as_str()));
    if !time.is_empty() {
        target.insert(ReservedKey::Time.tag(time));
    }
    if !reason.is_empty() {
        target.insert(ReservedKey::Reason.tag(reason));
    }
    target
}

/// Drop every reserved-key tag from `current`, then add `target`. Tags outside
/// the reserved keys pass through untouched.
#[must_use]
pub fn reconcile(current: &BTreeSet<String>, target: &BTreeSet<String>) -> BTreeSet<String> {
    current
        .iter()
        .filter(|tag| ReservedKey::of(tag).is_none())
        .chain(target.iter())
        .cloned()
        .collect()
}

/// Drop every tag in the `review:` namespace.
#[must_use]
pub fn strip_review_namespace(current: &BTreeSet<String>) -> BTreeSet<String> {
    current.iter().filter(|tag| !is_review_tag(tag)).cloned().collect()
}

/// Row-level mutation needed to move a record from one tag set to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl TagDiff {
    #[must_use]
    pub fn between(current: &BTreeSet<String>, next: &BTreeSet<String>) -> Self {
        Self {
            added: next.difference(current).cloned().collect(),
            removed: current.difference(next).cloned().collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
