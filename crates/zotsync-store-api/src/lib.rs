use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use zotsync_core::{
    fold, is_review_tag, normalize_identifier, resolve_year, years_compatible, LibraryScope, Record,
    RecordStore, StoreError,
};

pub const DEFAULT_BASE_URL: &str = "https://api.zotero.org";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest page the web API serves.
const PAGE_LIMIT: usize = 100;
const EXACT_POOL: usize = 100;
const FUZZY_POOL: usize = 200;

const NON_BIBLIOGRAPHIC_TYPES: [&str; 3] = ["attachment", "note", "annotation"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ApiConfig {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self { base_url: DEFAULT_BASE_URL.to_string(), api_key: api_key.into(), timeout: DEFAULT_TIMEOUT }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Zotero web API library, reached over HTTP.
pub struct ApiLibrary {
    agent: ureq::Agent,
    base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    key: String,
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    data: ApiItemData,
}

#[derive(Debug, Default, Deserialize)]
struct ApiItemData {
    #[serde(default, rename = "itemType")]
    item_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: String,
    #[serde(default, rename = "publicationYear")]
    publication_year: String,
    #[serde(default, rename = "DOI")]
    doi: String,
    #[serde(default)]
    tags: Vec<ApiTag>,
}

#[derive(Debug, Deserialize)]
struct ApiTag {
    tag: String,
    /// Absent or 0 for manual tags, 1 for automatic ones.
    #[serde(default, rename = "type")]
    kind: Option<u8>,
}

impl ApiItem {
    fn is_bibliographic(&self) -> bool {
        !NON_BIBLIOGRAPHIC_TYPES.contains(&self.data.item_type.as_str())
    }

    fn into_record(self) -> Record {
        let ApiItemData { title, date, publication_year, doi, tags, .. } = self.data;
        let tag_types = tags
            .iter()
            .filter_map(|tag| tag.kind.filter(|kind| *kind != 0).map(|kind| (tag.tag.clone(), kind)))
            .collect::<BTreeMap<_, _>>();
        Record {
            key: self.key,
            version: self.version,
            year: resolve_year(Some(publication_year.as_str()), Some(date.as_str())),
            title,
            identifier: Some(doi).filter(|doi| !doi.trim().is_empty()),
            tags: tags.into_iter().map(|tag| tag.tag).collect(),
            tag_types,
        }
    }
}

/// How the web API interprets `q`.
#[derive(Debug, Clone, Copy)]
enum QueryMode {
    TitleCreatorYear,
    Everything,
}

impl QueryMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::TitleCreatorYear => "titleCreatorYear",
            Self::Everything => "everything",
        }
    }
}

impl ApiLibrary {
    #[must_use]
    pub fn new(config: &ApiConfig, scope: &LibraryScope) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        let base = format!(
            "{}/{}/{}",
            config.base_url.trim_end_matches('/'),
            scope.path_segment(),
            scope.id()
        );
        Self { agent, base, api_key: config.api_key.clone() }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Page through `/items` until a short page or `cap` items.
    fn fetch_items(&self, query: Option<(&str, QueryMode)>, cap: Option<usize>) -> Result<Vec<ApiItem>, StoreError> {
        let url = format!("{}/items", self.base);
        let mut items = Vec::new();
        loop {
            let limit = cap.map_or(PAGE_LIMIT, |cap| PAGE_LIMIT.min(cap.saturating_sub(items.len())));
            if limit == 0 {
                break;
            }
            let mut request = self
                .agent
                .get(&url)
                .set("Zotero-API-Key", &self.api_key)
                .query("format", "json")
                .query("limit", &limit.to_string())
                .query("start", &items.len().to_string());
            if let Some((q, mode)) = query {
                request = request.query("q", q).query("qmode", mode.as_str());
            }

            let page: Vec<ApiItem> = request
                .call()
                .map_err(status_error)?
                .into_json()
                .map_err(|err| StoreError::Backend(format!("malformed items response: {err}")))?;
            let received = page.len();
            items.extend(page);
            debug!(url = %url, received, total = items.len(), "fetched items page");
            if received < limit {
                break;
            }
        }
        Ok(items)
    }

    fn search(
        &self,
        query: Option<(&str, QueryMode)>,
        cap: Option<usize>,
        keep: impl Fn(&Record) -> bool,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(self
            .fetch_items(query, cap)?
            .into_iter()
            .filter(ApiItem::is_bibliographic)
            .map(ApiItem::into_record)
            .filter(|record| keep(record))
            .collect())
    }
}

impl RecordStore for ApiLibrary {
    fn search_by_identifier(&self, identifier: &str) -> Result<Vec<Record>, StoreError> {
        let wanted = normalize_identifier(identifier);
        self.search(Some((wanted.as_str(), QueryMode::Everything)), Some(EXACT_POOL), |record| {
            record.identifier.as_deref().map(normalize_identifier).as_deref() == Some(wanted.as_str())
        })
    }

    fn search_by_title_year(&self, title: &str, year: Option<&str>) -> Result<Vec<Record>, StoreError> {
        let wanted = fold(title);
        self.search(Some((title, QueryMode::TitleCreatorYear)), Some(EXACT_POOL), |record| {
            fold(&record.title) == wanted && years_compatible(year, record.year.as_deref())
        })
    }

    fn search_fuzzy(&self, title: &str) -> Result<Vec<Record>, StoreError> {
        self.search(Some((title, QueryMode::Everything)), Some(FUZZY_POOL), |record| {
            !record.title.trim().is_empty()
        })
    }

    /// Tags as of the search that produced `record`; the version precondition
    /// on commit rejects writes based on a stale view.
    fn get_tags(&self, record: &Record) -> Result<BTreeSet<String>, StoreError> {
        Ok(record.tags.clone())
    }

    fn commit_tags(&mut self, record: &Record, tags: &BTreeSet<String>) -> Result<(), StoreError> {
        let url = format!("{}/items/{}", self.base, record.key);
        let body = json!({ "tags": tag_payload(record, tags) });
        let mut request = self.agent.patch(&url).set("Zotero-API-Key", &self.api_key);
        if let Some(version) = record.version {
            request = request.set("If-Unmodified-Since-Version", &version.to_string());
        }

        match request.send_json(body) {
            Ok(response) => {
                debug!(key = %record.key, status = response.status(), "committed tags");
                Ok(())
            }
            Err(ureq::Error::Status(412, _)) => {
                warn!(key = %record.key, version = ?record.version, "item changed since it was read");
                Err(StoreError::Conflict { key: record.key.clone(), version: record.version.unwrap_or_default() })
            }
            Err(ureq::Error::Status(404, _)) => Err(StoreError::MissingRecord(record.key.clone())),
            Err(err) => Err(status_error(err)),
        }
    }

    fn list_review_tagged(&self) -> Result<Vec<Record>, StoreError> {
        self.search(None, None, |record| record.tags.iter().any(|tag| is_review_tag(tag)))
    }
}

/// PATCH replaces the whole list, so kept tags must go back with their type.
fn tag_payload(record: &Record, tags: &BTreeSet<String>) -> Vec<serde_json::Value> {
    tags.iter()
        .map(|tag| match record.tag_types.get(tag) {
            Some(kind) => json!({ "tag": tag, "type": kind }),
            None => json!({ "tag": tag }),
        })
        .collect()
}

fn status_error(err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, response) => StoreError::Rejected {
            status,
            message: response.into_string().unwrap_or_default().trim().to_string(),
        },
        ureq::Error::Transport(transport) => StoreError::Unreachable(transport.to_string()),
    }
}
