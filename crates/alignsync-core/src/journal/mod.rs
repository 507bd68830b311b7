//! Change journal
//!
//! An append-only, time-ordered log of per-link changes kept inside the
//! project database. Link writes record their entries in the same SQLite
//! transaction as the link rows, so the log never disagrees with the links.
//!
//! ## Entry kinds
//!
//! - `CREATE` / `DELETE`: the full link
//! - `UPDATE`: a [`LinkDiff`]; never empty
//! - `BULK_INSERT`: a chunk of links stored in an external chunk file
//!
//! Entries are drained oldest first in homogeneous units (see
//! [`JournalLog::first_upload_chunk`]) and deleted once acknowledged.

pub mod chunks;
pub mod diff;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{now_millis, Link};

pub use diff::{LinkChange, LinkDiff, PatchOperation};

/// Kind of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalEntryType {
    Create,
    Update,
    Delete,
    BulkInsert,
}

impl JournalEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalEntryType::Create => "CREATE",
            JournalEntryType::Update => "UPDATE",
            JournalEntryType::Delete => "DELETE",
            JournalEntryType::BulkInsert => "BULK_INSERT",
        }
    }
}

impl fmt::Display for JournalEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalEntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATE" => Ok(JournalEntryType::Create),
            "UPDATE" => Ok(JournalEntryType::Update),
            "DELETE" => Ok(JournalEntryType::Delete),
            "BULK_INSERT" => Ok(JournalEntryType::BulkInsert),
            other => Err(Error::validation(format!("unknown journal entry type '{}'", other))),
        }
    }
}

/// Payload of a journal entry
#[derive(Debug, Clone, PartialEq)]
pub enum JournalBody {
    /// Full link (CREATE and DELETE)
    Link(Link),
    /// Changed fields (UPDATE)
    Diff(LinkDiff),
    /// Links live in the entry's chunk file (BULK_INSERT)
    Chunk,
}

/// A stored journal entry
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub id: String,
    pub link_id: Option<String>,
    pub entry_type: JournalEntryType,
    /// Epoch milliseconds; never lower than any earlier entry's
    pub date: i64,
    pub body: JournalBody,
    pub bulk_insert_file: Option<String>,
}

impl JournalEntry {
    pub fn is_bulk(&self) -> bool {
        self.entry_type == JournalEntryType::BulkInsert
    }
}

/// View over the journal of one project database
pub struct JournalLog<'a> {
    conn: &'a mut Connection,
    chunk_dir: &'a Path,
    bulk_chunk_size: usize,
}

impl<'a> JournalLog<'a> {
    pub(crate) fn new(conn: &'a mut Connection, chunk_dir: &'a Path, bulk_chunk_size: usize) -> Self {
        Self {
            conn,
            chunk_dir,
            bulk_chunk_size,
        }
    }

    /// Number of pending entries
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM journal_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Entries in log order
    pub fn entries(&self, limit: usize, offset: usize) -> Result<Vec<JournalEntry>> {
        query_entries(
            self.conn,
            "SELECT id, link_id, type, date, body, bulk_insert_file FROM journal_entries
             ORDER BY date, seq LIMIT ?1 OFFSET ?2",
            params![limit as i64, offset as i64],
        )
    }

    /// The next homogeneous, bounded transmission unit
    ///
    /// - the oldest `max_entries` entries when none of them is BULK_INSERT
    /// - only the oldest entry when it is BULK_INSERT
    /// - otherwise the run of non-bulk entries before the first BULK_INSERT
    pub fn first_upload_chunk(&self, max_entries: usize) -> Result<Vec<JournalEntry>> {
        let oldest = self.entries(max_entries.max(1), 0)?;
        match oldest.first() {
            None => Ok(Vec::new()),
            Some(first) if first.is_bulk() => Ok(vec![first.clone()]),
            Some(_) => Ok(oldest.into_iter().take_while(|e| !e.is_bulk()).collect()),
        }
    }

    /// Remove acknowledged entries and the chunk files of bulk entries
    pub fn delete(&mut self, entry_ids: &[String]) -> Result<usize> {
        if entry_ids.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut files = Vec::new();
        let mut deleted = 0;
        for id in entry_ids {
            let file: Option<Option<String>> = tx
                .query_row(
                    "SELECT bulk_insert_file FROM journal_entries WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(Some(file)) = file {
                files.push(file);
            }
            deleted += tx.execute("DELETE FROM journal_entries WHERE id = ?1", [id])?;
        }
        tx.commit()?;

        // The entries are gone; a leftover file is only litter
        discard_chunks(self.chunk_dir, &files);
        debug!(deleted, "Deleted acknowledged journal entries");
        Ok(deleted)
    }

    /// Links of a BULK_INSERT entry
    pub fn load_chunk(&self, entry: &JournalEntry) -> Result<Vec<Link>> {
        match (&entry.entry_type, &entry.bulk_insert_file) {
            (JournalEntryType::BulkInsert, Some(file)) => {
                Ok(chunks::read_chunk(self.chunk_dir, file)?)
            }
            _ => Err(Error::validation(format!(
                "journal entry '{}' is not a bulk insert",
                entry.id
            ))),
        }
    }

    /// Replace the whole log by BULK_INSERT chunks of `links`
    ///
    /// Used before a project's first upload, when the server needs the
    /// complete link set rather than the local edit history.
    pub fn rebase(&mut self, links: &[Link]) -> Result<usize> {
        let old_files = self.chunk_files()?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM journal_entries", [])?;
        let written = write_bulk(&tx, self.chunk_dir, links, self.bulk_chunk_size)?;
        if let Err(e) = tx.commit() {
            discard_chunks(self.chunk_dir, &written);
            return Err(e.into());
        }

        discard_chunks(self.chunk_dir, &old_files);
        debug!(links = links.len(), chunks = written.len(), "Rebased journal");
        Ok(written.len())
    }

    /// Drop every entry and chunk file
    pub fn clear(&mut self) -> Result<()> {
        self.conn.execute("DELETE FROM journal_entries", [])?;
        discard_chunk_dir(self.chunk_dir);
        Ok(())
    }

    fn chunk_files(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT bulk_insert_file FROM journal_entries WHERE bulk_insert_file IS NOT NULL",
        )?;
        let files = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(files)
    }
}

struct EntryRow {
    id: String,
    link_id: Option<String>,
    entry_type: String,
    date: i64,
    body: Option<String>,
    bulk_insert_file: Option<String>,
}

fn query_entries<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<JournalEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(EntryRow {
                id: row.get(0)?,
                link_id: row.get(1)?,
                entry_type: row.get(2)?,
                date: row.get(3)?,
                body: row.get(4)?,
                bulk_insert_file: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter().map(hydrate_entry).collect()
}

fn hydrate_entry(row: EntryRow) -> Result<JournalEntry> {
    let entry_type: JournalEntryType = row.entry_type.parse()?;
    let body = match entry_type {
        JournalEntryType::BulkInsert => JournalBody::Chunk,
        JournalEntryType::Update => {
            JournalBody::Diff(serde_json::from_str(row.body.as_deref().unwrap_or("[]"))?)
        }
        JournalEntryType::Create | JournalEntryType::Delete => {
            let body = row.body.as_deref().ok_or_else(|| {
                Error::validation(format!("journal entry '{}' has no body", row.id))
            })?;
            JournalBody::Link(serde_json::from_str(body)?)
        }
    };
    Ok(JournalEntry {
        id: row.id,
        link_id: row.link_id,
        entry_type,
        date: row.date,
        body,
        bulk_insert_file: row.bulk_insert_file,
    })
}

/// Timestamp for a new entry: now, unless the log already holds a later one
fn next_timestamp(conn: &Connection) -> Result<i64> {
    let newest: Option<i64> =
        conn.query_row("SELECT MAX(date) FROM journal_entries", [], |row| row.get(0))?;
    Ok(newest.map_or(now_millis(), |newest| newest.max(now_millis())))
}

fn insert_entry(
    conn: &Connection,
    entry_type: JournalEntryType,
    link_id: Option<&str>,
    date: i64,
    body: Option<String>,
    bulk_insert_file: Option<&str>,
    id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO journal_entries (id, link_id, type, date, body, bulk_insert_file)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, link_id, entry_type.as_str(), date, body, bulk_insert_file],
    )?;
    Ok(())
}

/// Record CREATE/UPDATE entries for a save
///
/// `prior` holds the stored versions captured before the write. Returns the
/// number of entries written; unchanged links produce none.
pub(crate) fn record_save(conn: &Connection, prior: &HashMap<String, Link>, links: &[Link]) -> Result<usize> {
    let date = next_timestamp(conn)?;
    let mut written = 0;
    for link in links {
        let (entry_type, body) = match prior.get(&link.id) {
            None => (JournalEntryType::Create, serde_json::to_string(link)?),
            Some(old) => {
                let diff = LinkDiff::between(old, link);
                if diff.is_empty() {
                    continue;
                }
                (JournalEntryType::Update, serde_json::to_string(&diff)?)
            }
        };
        let id = Uuid::new_v4().to_string();
        insert_entry(conn, entry_type, Some(&link.id), date, Some(body), None, &id)?;
        written += 1;
    }
    Ok(written)
}

/// Record one DELETE entry per removed link
pub(crate) fn record_remove(conn: &Connection, removed: &[Link]) -> Result<usize> {
    let date = next_timestamp(conn)?;
    for link in removed {
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(link)?;
        insert_entry(conn, JournalEntryType::Delete, Some(&link.id), date, Some(body), None, &id)?;
    }
    Ok(removed.len())
}

/// Partition `links` into chunk files with one BULK_INSERT entry each
///
/// Returns the chunk file names written. When this fails, files already
/// written are removed; when the surrounding transaction fails afterwards
/// the caller must pass the result to [`discard_chunks`].
pub(crate) fn write_bulk(
    conn: &Connection,
    chunk_dir: &Path,
    links: &[Link],
    chunk_size: usize,
) -> Result<Vec<String>> {
    let mut written = Vec::new();
    let result = (|| -> Result<()> {
        let date = next_timestamp(conn)?;
        for chunk in links.chunks(chunk_size.max(1)) {
            let id = Uuid::new_v4().to_string();
            let file = chunks::write_chunk(chunk_dir, &id, chunk)?;
            written.push(file.clone());
            insert_entry(conn, JournalEntryType::BulkInsert, None, date, None, Some(&file), &id)?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => Ok(written),
        Err(e) => {
            discard_chunks(chunk_dir, &written);
            Err(e)
        }
    }
}

/// Best-effort removal of chunk files no entry points at any more
pub(crate) fn discard_chunks(chunk_dir: &Path, files: &[String]) {
    for file in files {
        if let Err(e) = chunks::remove_chunk(chunk_dir, file) {
            warn!(file = %file, error = %e, "Failed to remove orphaned chunk file");
        }
    }
}

/// Best-effort removal of the whole chunk directory
pub(crate) fn discard_chunk_dir(chunk_dir: &Path) {
    if let Err(e) = chunks::remove_chunk_dir(chunk_dir) {
        warn!(dir = ?chunk_dir, error = %e, "Failed to remove chunk directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkStatus;
    use crate::reference::Reference;
    use crate::storage::schema::init_project_schema;
    use tempfile::TempDir;

    fn setup() -> (Connection, TempDir) {
        let conn = Connection::open_in_memory().unwrap();
        init_project_schema(&conn).unwrap();
        (conn, TempDir::new().unwrap())
    }

    fn link(id: &str, w: u16) -> Link {
        Link::with_id(
            id,
            vec![Reference::word(1, 1, 1, w).unwrap()],
            vec![Reference::word(1, 1, 1, w).unwrap()],
        )
    }

    fn links(n: usize) -> Vec<Link> {
        (0..n).map(|i| link(&format!("l{}", i), (i % 900 + 1) as u16)).collect()
    }

    #[test]
    fn test_record_save_create_then_update() {
        let (mut conn, temp) = setup();
        let first = link("l1", 1);
        record_save(&conn, &HashMap::new(), &[first.clone()]).unwrap();

        let changed = first.clone().with_status(LinkStatus::Approved);
        let prior = HashMap::from([(first.id.clone(), first.clone())]);
        record_save(&conn, &prior, &[changed]).unwrap();

        let log = JournalLog::new(&mut conn, temp.path(), 10);
        let entries = log.entries(10, 0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_type, JournalEntryType::Create);
        assert_eq!(entries[0].body, JournalBody::Link(first));
        assert_eq!(entries[1].entry_type, JournalEntryType::Update);
        match &entries[1].body {
            JournalBody::Diff(diff) => {
                assert_eq!(diff.changes(), &[LinkChange::Status(LinkStatus::Approved)])
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_unchanged_save_writes_nothing() {
        let (mut conn, temp) = setup();
        let l = link("l1", 1);
        let prior = HashMap::from([(l.id.clone(), l.clone())]);
        assert_eq!(record_save(&conn, &prior, &[l]).unwrap(), 0);
        assert_eq!(JournalLog::new(&mut conn, temp.path(), 10).count().unwrap(), 0);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let (mut conn, temp) = setup();
        let future = now_millis() + 60_000;
        insert_entry(&conn, JournalEntryType::Create, Some("x"), future, Some(serde_json::to_string(&link("x", 1)).unwrap()), None, "e0").unwrap();
        record_remove(&conn, &[link("l1", 1)]).unwrap();

        let log = JournalLog::new(&mut conn, temp.path(), 10);
        let entries = log.entries(10, 0).unwrap();
        assert_eq!(entries[0].id, "e0");
        assert!(entries[1].date >= future);
        assert_eq!(entries[1].entry_type, JournalEntryType::Delete);
    }

    #[test]
    fn test_bulk_chunking() {
        let (mut conn, temp) = setup();
        let files = write_bulk(&conn, temp.path(), &links(25), 10).unwrap();
        assert_eq!(files.len(), 3);

        let log = JournalLog::new(&mut conn, temp.path(), 10);
        let entries = log.entries(10, 0).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.is_bulk() && e.link_id.is_none()));

        let sizes: Vec<usize> = entries.iter().map(|e| log.load_chunk(e).unwrap().len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_first_upload_chunk_rules() {
        let (mut conn, temp) = setup();

        // c: non-bulk run before the first bulk entry
        record_save(&conn, &HashMap::new(), &[link("a", 1), link("b", 2)]).unwrap();
        write_bulk(&conn, temp.path(), &links(3), 10).unwrap();
        record_save(&conn, &HashMap::new(), &[link("c", 3)]).unwrap();

        let mut log = JournalLog::new(&mut conn, temp.path(), 10);
        let unit = log.first_upload_chunk(100).unwrap();
        assert_eq!(unit.len(), 2);
        assert!(unit.iter().all(|e| !e.is_bulk()));

        // b: a leading bulk entry travels alone
        let ids: Vec<String> = unit.iter().map(|e| e.id.clone()).collect();
        log.delete(&ids).unwrap();
        let unit = log.first_upload_chunk(100).unwrap();
        assert_eq!(unit.len(), 1);
        assert!(unit[0].is_bulk());

        // a: bounded by max_entries
        log.delete(&[unit[0].id.clone()]).unwrap();
        assert_eq!(log.first_upload_chunk(100).unwrap().len(), 1);
        assert_eq!(log.first_upload_chunk(0).unwrap().len(), 1);
    }

    #[test]
    fn test_first_upload_chunk_is_bounded() {
        let (mut conn, temp) = setup();
        record_save(&conn, &HashMap::new(), &links(7)).unwrap();
        let log = JournalLog::new(&mut conn, temp.path(), 10);
        let unit = log.first_upload_chunk(5).unwrap();
        assert_eq!(unit.len(), 5);
        assert_eq!(unit[0].link_id.as_deref(), Some("l0"));
    }

    #[test]
    fn test_delete_bulk_removes_chunk_file() {
        let (mut conn, temp) = setup();
        let files = write_bulk(&conn, temp.path(), &links(2), 10).unwrap();
        let path = temp.path().join(&files[0]);
        assert!(path.exists());

        let mut log = JournalLog::new(&mut conn, temp.path(), 10);
        let entry = log.first_upload_chunk(10).unwrap().remove(0);
        assert_eq!(log.delete(&[entry.id]).unwrap(), 1);
        assert!(!path.exists());
        assert_eq!(log.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_survives_a_chunk_that_cannot_be_removed() {
        let (mut conn, temp) = setup();
        let files = write_bulk(&conn, temp.path(), &links(2), 10).unwrap();
        // A directory in place of the chunk file makes remove_file fail
        let path = temp.path().join(&files[0]);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let mut log = JournalLog::new(&mut conn, temp.path(), 10);
        let entry = log.first_upload_chunk(10).unwrap().remove(0);
        assert_eq!(log.delete(&[entry.id]).unwrap(), 1);
        assert_eq!(log.count().unwrap(), 0);
    }

    #[test]
    fn test_rebase_replaces_history() {
        let (mut conn, temp) = setup();
        record_save(&conn, &HashMap::new(), &links(4)).unwrap();
        let old_files = write_bulk(&conn, temp.path(), &links(2), 10).unwrap();

        let mut log = JournalLog::new(&mut conn, temp.path(), 3);
        assert_eq!(log.rebase(&links(7)).unwrap(), 3);

        let entries = log.entries(100, 0).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(JournalEntry::is_bulk));
        assert!(!temp.path().join(&old_files[0]).exists());
    }

    #[test]
    fn test_load_chunk_rejects_non_bulk() {
        let (mut conn, temp) = setup();
        record_save(&conn, &HashMap::new(), &[link("a", 1)]).unwrap();
        let log = JournalLog::new(&mut conn, temp.path(), 10);
        let entry = log.entries(1, 0).unwrap().remove(0);
        assert!(matches!(log.load_chunk(&entry), Err(Error::Validation(_))));
    }
}
