use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info};
use zotsync_core::{
    fold, is_review_tag, normalize_identifier, resolve_year, years_compatible, LibraryScope, Record,
    RecordStore, StoreError, TagDiff,
};

/// Item types written by `export`.
pub const EXPORT_ITEM_TYPES: [&str; 6] =
    ["journalArticle", "book", "conferencePaper", "report", "thesis", "webpage"];

/// Item types that never take part in matching.
const NON_BIBLIOGRAPHIC_TYPES: &str = "'attachment', 'note', 'annotation'";

/// Separator for aggregated tag names; cannot occur in a Zotero tag.
const TAG_SEPARATOR: char = '\u{1f}';

/// Manual tags carry type 0 in `itemTags`.
const MANUAL_TAG_TYPE: i64 = 0;

/// One library item in the shape `export` writes.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct LibraryEntry {
    pub key: String,
    pub item_type: String,
    pub title: String,
    pub abstract_note: String,
    /// Creators as `Last First`, in creator order.
    pub authors: Vec<String>,
    pub date: Option<String>,
    pub doi: String,
    pub url: String,
    pub tags: BTreeSet<String>,
}

/// A Zotero desktop database, scoped to one library.
pub struct SqliteLibrary {
    conn: Connection,
    library_id: i64,
    columns: ItemColumns,
}

#[derive(Debug, Clone, Copy, Default)]
struct ItemColumns {
    version: bool,
    synced: bool,
    client_date_modified: bool,
    trash: bool,
}

impl SqliteLibrary {
    /// Open the database at `path` and resolve the library for `scope`.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or the library does not exist.
    pub fn open(path: &Path, scope: &LibraryScope) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("database not found at {}", path.display()));
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .context("failed to configure sqlite pragmas")?;

        Self::from_connection(conn, scope)
    }

    /// Wrap an already-open connection.
    ///
    /// # Errors
    /// Returns an error when the library for `scope` cannot be resolved.
    pub fn from_connection(conn: Connection, scope: &LibraryScope) -> Result<Self> {
        let library_id = resolve_library_id(&conn, scope)?;
        let columns = ItemColumns {
            version: table_has_column(&conn, "items", "version")?,
            synced: table_has_column(&conn, "items", "synced")?,
            client_date_modified: table_has_column(&conn, "items", "clientDateModified")?,
            trash: table_exists(&conn, "deletedItems")?,
        };
        debug!(library_id, ?columns, "opened zotero database");
        Ok(Self { conn, library_id, columns })
    }

    #[must_use]
    pub fn library_id(&self) -> i64 {
        self.library_id
    }

    /// All exportable items of the library, in item order.
    ///
    /// # Errors
    /// Returns an error when the item query fails.
    pub fn export_entries(&self) -> Result<Vec<LibraryEntry>> {
        let types = EXPORT_ITEM_TYPES.iter().map(|name| format!("'{name}'")).collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT i.key, ty.typeName,
                    {title}, {abstract_note}, {date}, {doi}, {url},
                    i.itemID, {tags}
             FROM items i
             JOIN itemTypes ty ON ty.itemTypeID = i.itemTypeID
             WHERE i.libraryID = ?1 AND ty.typeName IN ({types}) {trash}
             ORDER BY i.itemID",
            title = field_value("title"),
            abstract_note = field_value("abstractNote"),
            date = field_value("date"),
            doi = field_value("DOI"),
            url = field_value("url"),
            tags = TAGS_SUBQUERY,
            trash = self.trash_clause(),
        );
        let mut creators = self.creators_by_item()?;
        let mut stmt = self.conn.prepare(&sql).context("failed to prepare export query")?;
        let rows = stmt
            .query_map(params![self.library_id], |row| {
                let item_id: i64 = row.get(7)?;
                Ok((
                    item_id,
                    LibraryEntry {
                        key: row.get(0)?,
                        item_type: row.get(1)?,
                        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        abstract_note: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        date: row.get(4)?,
                        doi: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                        url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                        authors: Vec::new(),
                        tags: split_tags(row.get(8)?),
                    },
                ))
            })
            .context("failed to query export entries")?;

        let mut entries = Vec::new();
        for row in rows {
            let (item_id, mut entry) = row.context("failed to decode export row")?;
            entry.authors = creators.remove(&item_id).unwrap_or_default();
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Creator names per item as `Last First`, in `orderIndex` order.
    fn creators_by_item(&self) -> Result<HashMap<i64, Vec<String>>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT ic.itemID, TRIM(COALESCE(c.lastName, '') || ' ' || COALESCE(c.firstName, ''))
                 FROM itemCreators ic
                 JOIN creators c ON c.creatorID = ic.creatorID
                 JOIN items i ON i.itemID = ic.itemID
                 WHERE i.libraryID = ?1
                 ORDER BY ic.itemID, ic.orderIndex",
            )
            .context("failed to prepare creator query")?;
        let rows = stmt
            .query_map(params![self.library_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .context("failed to query creators")?;

        let mut creators: HashMap<i64, Vec<String>> = HashMap::new();
        for row in rows {
            let (item_id, name) = row.context("failed to decode creator row")?;
            if !name.is_empty() {
                creators.entry(item_id).or_default().push(name);
            }
        }
        Ok(creators)
    }

    /// Load the bibliographic records of the library and keep those `keep`
    /// accepts. `narrow` restricts the scan in SQL to rows whose `field`
    /// contains the needle; `keep` still makes the exact decision.
    fn load_records(&self, narrow: Option<Narrow>, keep: impl Fn(&Record) -> bool) -> Result<Vec<Record>> {
        let mut values = vec![Value::Integer(self.library_id)];
        let narrow_clause = match narrow {
            Some(Narrow { field, needle }) => {
                values.push(Value::Text(needle));
                format!("AND instr(LOWER({}), ?2) > 0", field_value(field))
            }
            None => String::new(),
        };
        let sql = format!(
            "SELECT i.key, {version}, {title}, {date}, {doi}, {tags}
             FROM items i
             JOIN itemTypes ty ON ty.itemTypeID = i.itemTypeID
             WHERE i.libraryID = ?1 AND ty.typeName NOT IN ({NON_BIBLIOGRAPHIC_TYPES}) {trash} {narrow_clause}
             ORDER BY i.itemID",
            version = if self.columns.version { "i.version" } else { "NULL" },
            title = field_value("title"),
            date = field_value("date"),
            doi = field_value("DOI"),
            tags = TAGS_SUBQUERY,
            trash = self.trash_clause(),
        );
        let mut stmt = self.conn.prepare(&sql).context("failed to prepare record query")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let date: Option<String> = row.get(3)?;
                let version: Option<i64> = row.get(1)?;
                Ok(Record {
                    key: row.get(0)?,
                    version: version.and_then(|value| u64::try_from(value).ok()),
                    title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    year: resolve_year(None, date.as_deref()),
                    identifier: row.get::<_, Option<String>>(4)?.filter(|doi| !doi.trim().is_empty()),
                    tags: split_tags(row.get(5)?),
                    tag_types: BTreeMap::new(),
                })
            })
            .context("failed to query library records")?;

        let mut records = Vec::new();
        for row in rows {
            let record = row.context("failed to decode record row")?;
            if keep(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn trash_clause(&self) -> &'static str {
        if self.columns.trash {
            "AND i.itemID NOT IN (SELECT itemID FROM deletedItems)"
        } else {
            ""
        }
    }

    fn item_id(&self, key: &str) -> Result<Option<i64>> {
        lookup_item_id(&self.conn, self.library_id, key)
    }

    fn write_tags(&mut self, key: &str, tags: &BTreeSet<String>) -> Result<bool> {
        let library_id = self.library_id;
        let columns = self.columns;
        let tx = self.conn.transaction().context("failed to begin tag transaction")?;
        let Some(item_id) = lookup_item_id(&tx, library_id, key)? else {
            return Ok(false);
        };

        let current = item_tags(&tx, item_id)?;
        let diff = TagDiff::between(&current, tags);
        for name in &diff.removed {
            tx.execute(
                "DELETE FROM itemTags
                 WHERE itemID = ?1 AND tagID = (SELECT tagID FROM tags WHERE name = ?2)",
                params![item_id, name],
            )
            .with_context(|| format!("failed to remove tag {name} from item {key}"))?;
        }
        for name in &diff.added {
            let tag_id = ensure_tag(&tx, name)?;
            tx.execute(
                "INSERT OR IGNORE INTO itemTags (itemID, tagID, type) VALUES (?1, ?2, ?3)",
                params![item_id, tag_id, MANUAL_TAG_TYPE],
            )
            .with_context(|| format!("failed to add tag {name} to item {key}"))?;
        }
        if !diff.is_empty() {
            mark_modified(&tx, item_id, columns)?;
        }

        tx.commit().context("failed to commit tag transaction")?;
        debug!(key, added = diff.added.len(), removed = diff.removed.len(), "committed tags");
        Ok(true)
    }
}

impl RecordStore for SqliteLibrary {
    fn search_by_identifier(&self, identifier: &str) -> Result<Vec<Record>, StoreError> {
        let wanted = normalize_identifier(identifier);
        self.load_records(Narrow::new("DOI", &wanted), |record| {
            record.identifier.as_deref().map(normalize_identifier).as_deref() == Some(wanted.as_str())
        })
        .map_err(backend)
    }

    fn search_by_title_year(&self, title: &str, year: Option<&str>) -> Result<Vec<Record>, StoreError> {
        let wanted = fold(title);
        self.load_records(Narrow::new("title", &wanted), |record| {
            fold(&record.title) == wanted && years_compatible(year, record.year.as_deref())
        })
        .map_err(backend)
    }

    fn search_fuzzy(&self, _title: &str) -> Result<Vec<Record>, StoreError> {
        self.load_records(None, |record| !record.title.trim().is_empty()).map_err(backend)
    }

    fn get_tags(&self, record: &Record) -> Result<BTreeSet<String>, StoreError> {
        let item_id = self
            .item_id(&record.key)
            .map_err(backend)?
            .ok_or_else(|| StoreError::MissingRecord(record.key.clone()))?;
        item_tags(&self.conn, item_id).map_err(backend)
    }

    fn commit_tags(&mut self, record: &Record, tags: &BTreeSet<String>) -> Result<(), StoreError> {
        if self.write_tags(&record.key, tags).map_err(backend)? {
            Ok(())
        } else {
            Err(StoreError::MissingRecord(record.key.clone()))
        }
    }

    fn list_review_tagged(&self) -> Result<Vec<Record>, StoreError> {
        let records = self
            .load_records(None, |record| record.tags.iter().any(|tag| is_review_tag(tag)))
            .map_err(backend)?;
        info!(records = records.len(), "listed review-tagged records");
        Ok(records)
    }
}

/// A `contains` condition on one item field.
struct Narrow {
    field: &'static str,
    needle: String,
}

impl Narrow {
    /// Longest ASCII word of the folded `wanted` value, since SQLite's `LOWER`
    /// only folds ASCII. `None` when there is no such word.
    fn new(field: &'static str, wanted: &str) -> Option<Self> {
        wanted
            .split_whitespace()
            .filter(|word| word.is_ascii())
            .max_by_key(|word| word.len())
            .map(|word| Self { field, needle: word.to_ascii_lowercase() })
    }
}

const TAGS_SUBQUERY: &str = "(SELECT GROUP_CONCAT(t.name, char(31))
    FROM itemTags it JOIN tags t ON t.tagID = it.tagID
    WHERE it.itemID = i.itemID)";

fn field_value(field_name: &str) -> String {
    format!(
        "(SELECT CAST(v.value AS TEXT)
          FROM itemData d
          JOIN fields f ON f.fieldID = d.fieldID
          JOIN itemDataValues v ON v.valueID = d.valueID
          WHERE d.itemID = i.itemID AND f.fieldName = '{field_name}')"
    )
}

fn split_tags(joined: Option<String>) -> BTreeSet<String> {
    joined
        .map(|joined| joined.split(TAG_SEPARATOR).map(ToString::to_string).collect())
        .unwrap_or_default()
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{err:#}"))
}

fn resolve_library_id(conn: &Connection, scope: &LibraryScope) -> Result<i64> {
    match scope {
        LibraryScope::Group(group_id) => {
            let group_id: i64 = group_id
                .parse()
                .with_context(|| format!("group library id must be numeric, got {group_id}"))?;
            conn.query_row(
                "SELECT libraryID FROM groups WHERE groupID = ?1",
                params![group_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up group library")?
            .ok_or_else(|| anyhow!("group {group_id} not found in database"))
        }
        LibraryScope::User(_) => {
            if !table_exists(conn, "libraries")? {
                return Ok(1);
            }
            conn.query_row(
                "SELECT libraryID FROM libraries WHERE type = 'user' ORDER BY libraryID LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("failed to look up user library")?
            .ok_or_else(|| anyhow!("no user library in database"))
        }
    }
}

fn lookup_item_id(conn: &Connection, library_id: i64, key: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT itemID FROM items WHERE libraryID = ?1 AND key = ?2",
        params![library_id, key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("failed to look up item {key}"))
}

fn item_tags(conn: &Connection, item_id: i64) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare("SELECT t.name FROM itemTags it JOIN tags t ON t.tagID = it.tagID WHERE it.itemID = ?1")
        .context("failed to prepare tag query")?;
    let rows = stmt
        .query_map(params![item_id], |row| row.get::<_, String>(0))
        .with_context(|| format!("failed to read tags of item {item_id}"))?;

    let mut tags = BTreeSet::new();
    for row in rows {
        tags.insert(row.context("failed to decode tag row")?);
    }
    Ok(tags)
}

fn ensure_tag(tx: &Transaction<'_>, name: &str) -> Result<i64> {
    let existing = tx
        .query_row("SELECT tagID FROM tags WHERE name = ?1", params![name], |row| row.get(0))
        .optional()
        .with_context(|| format!("failed to look up tag {name}"))?;
    if let Some(tag_id) = existing {
        return Ok(tag_id);
    }

    let tag_id: i64 = tx
        .query_row("SELECT COALESCE(MAX(tagID), 0) + 1 FROM tags", [], |row| row.get(0))
        .context("failed to allocate tag id")?;
    tx.execute("INSERT INTO tags (tagID, name) VALUES (?1, ?2)", params![tag_id, name])
        .with_context(|| format!("failed to insert tag {name}"))?;
    Ok(tag_id)
}

fn mark_modified(tx: &Transaction<'_>, item_id: i64, columns: ItemColumns) -> Result<()> {
    if columns.synced {
        tx.execute("UPDATE items SET synced = 0 WHERE itemID = ?1", params![item_id])
            .context("failed to mark item unsynced")?;
    }
    if columns.client_date_modified {
        let now = OffsetDateTime::now_utc()
            .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
            .context("failed to format modification time")?;
        tx.execute(
            "UPDATE items SET clientDateModified = ?1 WHERE itemID = ?2",
            params![now, item_id],
        )
        .context("failed to update clientDateModified")?;
    }
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use zotsync_core::{Decision, Reconciler, SyncOptions};

    use super::*;

    const SCHEMA_SQL: &str = include_str!("../tests/fixtures/zotero_schema.sql");

    struct Item<'a> {
        id: i64,
        key: &'a str,
        item_type: i64,
        library: i64,
        title: &'a str,
        date: Option<&'a str>,
        doi: Option<&'a str>,
        tags: &'a [&'a str],
    }

    fn item<'a>(id: i64, key: &'a str, title: &'a str, date: Option<&'a str>) -> Item<'a> {
        Item { id, key, item_type: 1, library: 1, title, date, doi: None, tags: &[] }
    }

    fn set_field(conn: &Connection, item_id: i64, field_id: i64, value: &str) -> Result<()> {
        conn.execute("INSERT OR IGNORE INTO itemDataValues (value) VALUES (?1)", params![value])?;
        let value_id: i64 =
            conn.query_row("SELECT valueID FROM itemDataValues WHERE value = ?1", params![value], |row| {
                row.get(0)
            })?;
        conn.execute(
            "INSERT INTO itemData (itemID, fieldID, valueID) VALUES (?1, ?2, ?3)",
            params![item_id, field_id, value_id],
        )?;
        Ok(())
    }

    fn insert_item(conn: &Connection, item: &Item<'_>) -> Result<()> {
        conn.execute(
            "INSERT INTO items (itemID, itemTypeID, libraryID, key, version, synced)
             VALUES (?1, ?2, ?3, ?4, 7, 1)",
            params![item.id, item.item_type, item.library, item.key],
        )?;
        set_field(conn, item.id, 1, item.title)?;
        if let Some(date) = item.date {
            set_field(conn, item.id, 2, date)?;
        }
        if let Some(doi) = item.doi {
            set_field(conn, item.id, 3, doi)?;
        }
        for tag in item.tags {
            conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![tag])?;
            conn.execute(
                "INSERT INTO itemTags (itemID, tagID, type)
                 SELECT ?1, tagID, 0 FROM tags WHERE name = ?2",
                params![item.id, tag],
            )?;
        }
        Ok(())
    }

    fn fixture(items: &[Item<'_>]) -> Result<SqliteLibrary> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        for item in items {
            insert_item(&conn, item)?;
        }
        SqliteLibrary::from_connection(conn, &LibraryScope::User("0".to_string()))
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(ToString::to_string).collect()
    }

    fn keys(records: &[Record]) -> Vec<&str> {
        records.iter().map(|record| record.key.as_str()).collect()
    }

    #[test]
    fn resolves_user_and_group_libraries() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        let user = SqliteLibrary::from_connection(conn, &LibraryScope::User("99".to_string()))?;
        assert_eq!(user.library_id(), 1);

        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        let group = SqliteLibrary::from_connection(conn, &LibraryScope::Group("4242".to_string()))?;
        assert_eq!(group.library_id(), 2);

        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        assert!(SqliteLibrary::from_connection(conn, &LibraryScope::Group("1".to_string())).is_err());
        Ok(())
    }

    #[test]
    fn open_rejects_missing_database() {
        let missing = std::env::temp_dir().join("zotsync-does-not-exist.sqlite");
        let result = SqliteLibrary::open(&missing, &LibraryScope::User("0".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn records_resolve_year_and_skip_attachments_and_trash() -> Result<()> {
        let store = fixture(&[
            item(1, "AAAA1111", "Example Study", Some("2020-05-01 2020-05-01")),
            Item { item_type: 3, ..item(2, "PDF00001", "Example Study", None) },
            item(3, "TRASHED1", "Example Study", Some("2020")),
            Item { library: 2, ..item(4, "GROUP001", "Example Study", Some("2020")) },
        ])?;
        store.conn.execute("INSERT INTO deletedItems (itemID) VALUES (3)", [])?;

        let found = store.search_by_title_year("example  study", Some("2020"))?;
        assert_eq!(keys(&found), vec!["AAAA1111"]);
        assert_eq!(found[0].year.as_deref(), Some("2020"));
        assert_eq!(found[0].version, Some(7));
        Ok(())
    }

    #[test]
    fn identifier_search_normalizes_stored_doi() -> Result<()> {
        let store = fixture(&[
            Item { doi: Some("https://doi.org/10.1000/ABC"), ..item(1, "AAAA1111", "One", None) },
            Item { doi: Some("10.1000/other"), ..item(2, "BBBB2222", "Two", None) },
        ])?;
        let found = store.search_by_identifier("doi:10.1000/abc")?;
        assert_eq!(keys(&found), vec!["AAAA1111"]);
        Ok(())
    }

    #[test]
    fn narrowing_picks_longest_ascii_word() {
        let narrow = Narrow::new("title", "über die klimafolgen");
        assert_eq!(narrow.map(|narrow| narrow.needle), Some("klimafolgen".to_string()));
        assert!(Narrow::new("title", "über ökologie").is_none());
        assert!(Narrow::new("DOI", "").is_none());
    }

    #[test]
    fn exact_title_search_still_matches_mixed_case_and_non_ascii() -> Result<()> {
        let store = fixture(&[
            item(1, "AAAA1111", "ÜBER Die   KLIMAFOLGEN", Some("2020")),
            item(2, "BBBB2222", "Klimafolgen im Alpenraum", Some("2020")),
            item(3, "CCCC3333", "Über Ökologie", Some("2019")),
        ])?;
        let found = store.search_by_title_year("über die klimafolgen", Some("2020"))?;
        assert_eq!(keys(&found), vec!["AAAA1111"]);

        let found = store.search_by_title_year("über ökologie", None)?;
        assert_eq!(keys(&found), vec!["CCCC3333"]);
        Ok(())
    }

    #[test]
    fn commit_applies_diff_and_allocates_tag_ids() -> Result<()> {
        let mut store = fixture(&[Item {
            tags: &["climate", "review:Decision=excluded"],
            ..item(1, "AAAA1111", "Example Study", Some("2020"))
        }])?;
        let record = store.search_fuzzy("Example")?.remove(0);
        assert_eq!(record.tags, set(&["climate", "review:Decision=excluded"]));

        let next = set(&["climate", "review:Decision=included", "review:Time=2020-05-01 09:30"]);
        store.commit_tags(&record, &next)?;

        assert_eq!(store.get_tags(&record)?, next);
        let max_tag: i64 = store.conn.query_row("SELECT MAX(tagID) FROM tags", [], |row| row.get(0))?;
        assert_eq!(max_tag, 4);
        let (synced, modified): (i64, Option<String>) = store.conn.query_row(
            "SELECT synced, clientDateModified FROM items WHERE itemID = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(synced, 0);
        assert!(modified.is_some());
        Ok(())
    }

    #[test]
    fn failed_commit_rolls_back_every_change() -> Result<()> {
        let mut store = fixture(&[Item {
            tags: &["climate", "review:Decision=excluded"],
            ..item(1, "AAAA1111", "Example Study", Some("2020"))
        }])?;
        store.conn.execute_batch(
            "CREATE TRIGGER reject_item_tag BEFORE INSERT ON itemTags
             BEGIN SELECT RAISE(ABORT, 'item tag insert rejected'); END;",
        )?;
        let record = store.search_fuzzy("Example")?.remove(0);

        let result = store.commit_tags(&record, &set(&["climate", "review:Decision=included"]));
        assert!(matches!(result, Err(StoreError::Backend(_))), "got {result:?}");

        assert_eq!(store.get_tags(&record)?, set(&["climate", "review:Decision=excluded"]));
        let max_tag: i64 = store.conn.query_row("SELECT MAX(tagID) FROM tags", [], |row| row.get(0))?;
        assert_eq!(max_tag, 2);
        let synced: i64 = store.conn.query_row("SELECT synced FROM items WHERE itemID = 1", [], |row| row.get(0))?;
        assert_eq!(synced, 1);
        Ok(())
    }

    #[test]
    fn unchanged_commit_leaves_item_untouched() -> Result<()> {
        let mut store = fixture(&[Item { tags: &["climate"], ..item(1, "AAAA1111", "Example", None) }])?;
        let record = store.search_fuzzy("Example")?.remove(0);
        store.commit_tags(&record, &set(&["climate"]))?;

        let synced: i64 = store.conn.query_row("SELECT synced FROM items WHERE itemID = 1", [], |row| row.get(0))?;
        assert_eq!(synced, 1);
        Ok(())
    }

    #[test]
    fn commit_on_unknown_key_is_missing_record() -> Result<()> {
        let mut store = fixture(&[])?;
        let ghost = Record {
            key: "GHOST001".to_string(),
            version: None,
            title: "Ghost".to_string(),
            year: None,
            identifier: None,
            tags: BTreeSet::new(),
            tag_types: BTreeMap::new(),
        };
        let result = store.commit_tags(&ghost, &set(&["x"]));
        assert_eq!(result, Err(StoreError::MissingRecord("GHOST001".to_string())));
        Ok(())
    }

    #[test]
    fn reconciler_applies_and_cleans_through_sqlite() -> Result<()> {
        let mut store = fixture(&[
            Item { tags: &["keep"], ..item(1, "AAAA1111", "Example Study", Some("2020")) },
            item(2, "BBBB2222", "Unrelated Work", Some("2018")),
        ])?;
        let row = zotsync_core::DecisionRow {
            title: "Example Study".to_string(),
            year: "2020".to_string(),
            label: "1".to_string(),
            time: "2020-05-01T09:30:00Z".to_string(),
            ..zotsync_core::DecisionRow::default()
        };

        let report = Reconciler::new(&mut store, SyncOptions::default()).apply_decisions(&[row]);
        assert_eq!((report.updated, report.not_found, report.errors), (1, 0, 0));

        let tagged = store.list_review_tagged()?;
        assert_eq!(keys(&tagged), vec!["AAAA1111"]);
        assert!(tagged[0].tags.contains(&format!("review:Decision={}", Decision::Included.as_str())));

        let cleaned = Reconciler::new(&mut store, SyncOptions::default()).clean()?;
        assert_eq!(cleaned.removed, 1);
        assert_eq!(store.get_tags(&tagged[0])?, set(&["keep"]));
        Ok(())
    }

    #[test]
    fn export_entries_limit_item_types_and_join_creators() -> Result<()> {
        let store = fixture(&[
            Item {
                doi: Some("10.1/x"),
                tags: &["climate", "review:Decision=included"],
                ..item(1, "AAAA1111", "Example Study", Some("2020-05-01"))
            },
            Item { item_type: 3, ..item(2, "PDF00001", "Attachment", None) },
        ])?;
        store.conn.execute_batch(
            "INSERT INTO creators (creatorID, firstName, lastName) VALUES (1, 'Ada', 'Lovelace'), (2, 'Alan', 'Turing');
             INSERT INTO itemCreators (itemID, creatorID, orderIndex) VALUES (1, 2, 1), (1, 1, 0);",
        )?;

        let entries = store.export_entries()?;
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.item_type, "journalArticle");
        assert_eq!(entry.authors, vec!["Lovelace Ada".to_string(), "Turing Alan".to_string()]);
        assert_eq!(entry.doi, "10.1/x");
        assert_eq!(entry.date.as_deref(), Some("2020-05-01"));
        assert_eq!(entry.tags, set(&["climate", "review:Decision=included"]));
        Ok(())
    }
}
