//! Link storage
//!
//! A link is stored as a header row in `links` plus one join row per member
//! word in `links__source_words` / `links__target_words`. The header also
//! carries a denormalized, searchable rendering of the member words
//! (`sources_text` / `targets_text`) that is recomputed whenever the link is
//! written.
//!
//! Every write runs in one SQLite transaction together with its journal
//! entries. Listeners are told about committed changes in commit order.
//!
//! Local writes (`save`, `bulk_import`) only accept links whose members all
//! name a stored word or word part. Link sets adopted from the server are
//! taken as they are.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::journal;
use crate::models::{word_key, AlignmentSide, Link, LinkMeta};
use crate::reference::{RefField, Reference};

/// What happened to a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEventKind {
    Save,
    Remove,
}

/// A committed link mutation
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub kind: LinkEventKind,
    pub link: Link,
}

/// Receives committed link mutations
///
/// `on_change` is called synchronously after commit and must not block.
pub trait LinkChangeListener: Send + Sync {
    fn on_change(&self, event: LinkEvent);
}

/// Outcome of [`LinkStore::replace_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    /// Links that were added or differ from the local version
    pub changed: usize,
    /// Local links absent from the new set
    pub removed: usize,
}

/// View over the links of one project database
pub struct LinkStore<'a> {
    conn: &'a mut Connection,
    chunk_dir: &'a Path,
    bulk_chunk_size: usize,
    listeners: &'a [Arc<dyn LinkChangeListener>],
}

const HEADER_COLUMNS: &str = "id, origin, status";

impl<'a> LinkStore<'a> {
    pub(crate) fn new(
        conn: &'a mut Connection,
        chunk_dir: &'a Path,
        bulk_chunk_size: usize,
        listeners: &'a [Arc<dyn LinkChangeListener>],
    ) -> Self {
        Self {
            conn,
            chunk_dir,
            bulk_chunk_size,
            listeners,
        }
    }

    // ==================== Mutations ====================

    /// Upsert links
    ///
    /// Existing rows for the same ids are removed and reinserted. Journal
    /// entries are derived from the versions stored before the write.
    pub fn save(&mut self, links: &[Link]) -> Result<usize> {
        let links = prepare(links)?;
        if links.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = links.iter().map(|l| l.id.clone()).collect();

        let tx = self.conn.transaction()?;
        check_resolvable(&tx, &links)?;
        let prior: HashMap<String, Link> = read_links_by_id(&tx, &ids)?
            .into_iter()
            .map(|l| (l.id.clone(), l))
            .collect();

        delete_rows(&tx, &ids)?;
        for link in &links {
            insert_link(&tx, link)?;
        }
        refresh_text(&tx, &ids)?;
        let entries = journal::record_save(&tx, &prior, &links)?;
        tx.commit()?;

        debug!(links = links.len(), entries, "Saved links");
        self.notify(LinkEventKind::Save, links);
        Ok(ids.len())
    }

    /// Delete links by id; unknown ids are ignored
    pub fn remove(&mut self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let prior = read_links_by_id(&tx, ids)?;
        let present: Vec<String> = prior.iter().map(|l| l.id.clone()).collect();
        delete_rows(&tx, &present)?;
        journal::record_remove(&tx, &prior)?;
        tx.commit()?;

        debug!(links = prior.len(), "Removed links");
        let removed = prior.len();
        self.notify(LinkEventKind::Remove, prior);
        Ok(removed)
    }

    /// Insert a large set of links, journaled as BULK_INSERT chunks
    ///
    /// No per-link entries are written; the set is partitioned into chunk
    /// files of the configured size with one entry per chunk.
    pub fn bulk_import(&mut self, links: &[Link]) -> Result<usize> {
        let links = prepare(links)?;
        if links.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = links.iter().map(|l| l.id.clone()).collect();

        let tx = self.conn.transaction()?;
        check_resolvable(&tx, &links)?;
        delete_rows(&tx, &ids)?;
        for link in &links {
            insert_link(&tx, link)?;
        }
        refresh_text(&tx, &ids)?;
        let files = journal::write_bulk(&tx, self.chunk_dir, &links, self.bulk_chunk_size)?;
        if let Err(e) = tx.commit() {
            journal::discard_chunks(self.chunk_dir, &files);
            return Err(e.into());
        }

        info!(links = links.len(), chunks = files.len(), "Bulk imported links");
        let count = links.len();
        self.notify(LinkEventKind::Save, links);
        Ok(count)
    }

    /// Make the stored link set exactly `links`, without journaling
    ///
    /// Used to adopt the authoritative remote copy.
    pub fn replace_all(&mut self, links: &[Link]) -> Result<ReplaceSummary> {
        let links = prepare_lenient(links)?;

        let tx = self.conn.transaction()?;
        let mut prior: HashMap<String, Link> = read_all_links(&tx)?
            .into_iter()
            .map(|l| (l.id.clone(), l))
            .collect();

        write_link_set(&tx, &links)?;
        tx.commit()?;

        let mut changed = Vec::new();
        for link in links {
            match prior.remove(&link.id) {
                Some(old) if old == link => {}
                _ => changed.push(link),
            }
        }
        let mut vanished: Vec<Link> = prior.into_values().collect();
        vanished.sort_by(|a, b| a.id.cmp(&b.id));

        let summary = ReplaceSummary {
            changed: changed.len(),
            removed: vanished.len(),
        };
        info!(changed = summary.changed, removed = summary.removed, "Replaced link set");
        self.notify(LinkEventKind::Remove, vanished);
        self.notify(LinkEventKind::Save, changed);
        Ok(summary)
    }

    /// Recompute the searchable text of every link
    pub fn refresh_text_cache(&mut self) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM links")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };
        refresh_text(&tx, &ids)?;
        tx.commit()?;
        Ok(ids.len())
    }

    fn notify(&self, kind: LinkEventKind, links: Vec<Link>) {
        if self.listeners.is_empty() {
            return;
        }
        for link in links {
            for listener in self.listeners {
                listener.on_change(LinkEvent {
                    kind,
                    link: link.clone(),
                });
            }
        }
    }

    // ==================== Queries ====================

    /// Get a single link by id
    pub fn get(&self, id: &str) -> Result<Option<Link>> {
        Ok(read_links_by_id(self.conn, &[id.to_string()])?.pop())
    }

    /// Links with the given ids, ordered by id
    pub fn find_by_id(&self, ids: &[String]) -> Result<Vec<Link>> {
        read_links_by_id(self.conn, ids)
    }

    /// Links whose id lies in `from..=to`, ordered by id
    pub fn find_between(&self, from: &str, to: &str) -> Result<Vec<Link>> {
        read_links(
            self.conn,
            &format!(
                "SELECT {} FROM links WHERE id >= ?1 AND id <= ?2 ORDER BY id",
                HEADER_COLUMNS
            ),
            params![from, to],
        )
    }

    /// Links that contain `reference` on `side`
    pub fn find_by_member(&self, side: AlignmentSide, reference: &Reference) -> Result<Vec<Link>> {
        let sql = format!(
            "SELECT {} FROM links WHERE id IN
             (SELECT link_id FROM {} WHERE word_id = ?1) ORDER BY id",
            HEADER_COLUMNS,
            side.join_table()
        );
        read_links(self.conn, &sql, [word_key(side, reference)])
    }

    /// Links with a member on `side` inside the verse of `reference`
    pub fn find_by_verse(&self, side: AlignmentSide, reference: &Reference) -> Result<Vec<Link>> {
        if !reference.has_fields(RefField::Verse) {
            return Err(Error::validation(format!(
                "'{}' does not name a verse",
                reference
            )));
        }
        let prefix = format!("{}:{}", side.as_str(), reference.truncate(RefField::Verse));
        let sql = format!(
            "SELECT {} FROM links WHERE id IN
             (SELECT link_id FROM {} WHERE substr(word_id, 1, ?2) = ?1) ORDER BY id",
            HEADER_COLUMNS,
            side.join_table()
        );
        read_links(self.conn, &sql, params![prefix, prefix.len() as i64])
    }

    /// Page through all links ordered by id
    pub fn all(&self, limit: usize, offset: usize) -> Result<Vec<Link>> {
        read_links(
            self.conn,
            &format!("SELECT {} FROM links ORDER BY id LIMIT ?1 OFFSET ?2", HEADER_COLUMNS),
            params![limit as i64, offset as i64],
        )
    }

    /// Every stored link ordered by id
    pub fn all_links(&self) -> Result<Vec<Link>> {
        read_all_links(self.conn)
    }

    /// Number of stored links
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Links whose cached texts match exactly (concordance drill-down)
    pub fn links_by_texts(&self, sources_text: &str, targets_text: &str) -> Result<Vec<Link>> {
        read_links(
            self.conn,
            &format!(
                "SELECT {} FROM links WHERE sources_text = ?1 AND targets_text = ?2 ORDER BY id",
                HEADER_COLUMNS
            ),
            params![sources_text, targets_text],
        )
    }

    /// Cached `(sources_text, targets_text)` of a link
    pub fn cached_texts(&self, id: &str) -> Result<Option<(String, String)>> {
        let texts = self
            .conn
            .query_row(
                "SELECT sources_text, targets_text FROM links WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(texts)
    }
}

/// Normalize and validate, keeping the last occurrence of a repeated id
fn prepare(links: &[Link]) -> Result<Vec<Link>> {
    let prepared = prepare_lenient(links)?;
    for link in &prepared {
        link.validate()?;
    }
    Ok(prepared)
}

/// Normalize and dedup without the emptiness check
///
/// Member references are still required to be word-level.
pub(crate) fn prepare_lenient(links: &[Link]) -> Result<Vec<Link>> {
    let mut order: Vec<Link> = Vec::with_capacity(links.len());
    let mut index: HashMap<&str, usize> = HashMap::new();
    for original in links {
        if original.id.trim().is_empty() {
            return Err(Error::validation("link id must not be blank"));
        }
        let mut link = original.clone();
        link.normalize();
        match index.get(original.id.as_str()) {
            Some(&pos) => order[pos] = link,
            None => {
                index.insert(original.id.as_str(), order.len());
                order.push(link);
            }
        }
    }
    for link in &order {
        for side in AlignmentSide::ALL {
            if link.members(side).iter().any(|r| !r.has_fields(RefField::Word)) {
                return Err(Error::validation(format!(
                    "link '{}' has a {} reference that is not word-level",
                    link.id, side
                )));
            }
        }
    }
    Ok(order)
}

/// Fail with a validation error if a member names no stored word
///
/// A word-level member also resolves through any of its parts: part keys
/// extend the word key by one digit, so they sort between `key` and
/// `key || '9'`.
fn check_resolvable(conn: &Connection, links: &[Link]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "SELECT EXISTS(SELECT 1 FROM words_or_parts WHERE id BETWEEN ?1 AND ?1 || '9')",
    )?;
    for link in links {
        for side in AlignmentSide::ALL {
            for reference in link.members(side) {
                let found: bool = stmt.query_row([word_key(side, reference)], |row| row.get(0))?;
                if !found {
                    return Err(Error::validation(format!(
                        "link '{}' {} reference '{}' matches no corpus word",
                        link.id, side, reference
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Replace every link row with `links`, which must already be prepared
pub(crate) fn write_link_set(conn: &Connection, links: &[Link]) -> Result<()> {
    conn.execute("DELETE FROM links__source_words", [])?;
    conn.execute("DELETE FROM links__target_words", [])?;
    conn.execute("DELETE FROM links", [])?;
    for link in links {
        insert_link(conn, link)?;
    }
    let ids: Vec<String> = links.iter().map(|l| l.id.clone()).collect();
    refresh_text(conn, &ids)
}

/// Refresh the cached text of links referencing any of the word keys
pub(crate) fn refresh_links_with_words(conn: &Connection, word_keys: &[String]) -> Result<()> {
    let mut ids = Vec::new();
    for side in AlignmentSide::ALL {
        let sql = format!("SELECT DISTINCT link_id FROM {} WHERE word_id = ?1", side.join_table());
        let mut stmt = conn.prepare_cached(&sql)?;
        for key in word_keys {
            let found = stmt
                .query_map([key], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.extend(found);
        }
    }
    ids.sort();
    ids.dedup();
    refresh_text(conn, &ids)
}

fn insert_link(conn: &Connection, link: &Link) -> Result<()> {
    conn.execute(
        "INSERT INTO links (id, origin, status) VALUES (?1, ?2, ?3)",
        params![link.id, link.meta.origin.as_str(), link.meta.status.as_str()],
    )?;
    for side in AlignmentSide::ALL {
        let sql = format!(
            "INSERT INTO {} (link_id, word_id) VALUES (?1, ?2)",
            side.join_table()
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        for reference in link.members(side) {
            stmt.execute(params![link.id, word_key(side, reference)])?;
        }
    }
    Ok(())
}

fn delete_rows(conn: &Connection, ids: &[String]) -> Result<()> {
    for id in ids {
        conn.execute("DELETE FROM links__source_words WHERE link_id = ?1", [id])?;
        conn.execute("DELETE FROM links__target_words WHERE link_id = ?1", [id])?;
        conn.execute("DELETE FROM links WHERE id = ?1", [id])?;
    }
    Ok(())
}

/// Rebuild `sources_text` / `targets_text` from the current word rows
///
/// Parts of one word are concatenated; words are joined with a space in
/// reading order. Members without a word row contribute nothing.
fn refresh_text(conn: &Connection, ids: &[String]) -> Result<()> {
    let mut update = conn.prepare_cached(
        "UPDATE links SET sources_text = ?2, targets_text = ?3 WHERE id = ?1",
    )?;
    for id in ids {
        let sources = side_text(conn, AlignmentSide::Source, id)?;
        let targets = side_text(conn, AlignmentSide::Target, id)?;
        update.execute(params![id, sources, targets])?;
    }
    Ok(())
}

fn side_text(conn: &Connection, side: AlignmentSide, link_id: &str) -> Result<String> {
    let sql = format!(
        "SELECT w.id, w.normalized_text FROM {} j
         JOIN words_or_parts w ON w.id = j.word_id
         WHERE j.link_id = ?1 ORDER BY w.id",
        side.join_table()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map([link_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    // "<side>:" plus the word-level reference
    let word_len = side.as_str().len() + 1 + RefField::Word.end();
    let mut words: Vec<(String, String)> = Vec::new();
    for (key, text) in rows {
        let word = key.get(..word_len).unwrap_or(&key).to_string();
        match words.last_mut() {
            Some((last, joined)) if *last == word => joined.push_str(&text),
            _ => words.push((word, text)),
        }
    }
    Ok(words
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join(" "))
}

struct HeaderRow {
    id: String,
    origin: String,
    status: String,
}

pub(crate) fn read_all_links(conn: &Connection) -> Result<Vec<Link>> {
    read_links(
        conn,
        &format!("SELECT {} FROM links ORDER BY id", HEADER_COLUMNS),
        [],
    )
}

pub(crate) fn read_links_by_id(conn: &Connection, ids: &[String]) -> Result<Vec<Link>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut links = Vec::with_capacity(ids.len());
    // SQLite caps bound parameters per statement
    for batch in ids.chunks(500) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM links WHERE id IN ({}) ORDER BY id",
            HEADER_COLUMNS, placeholders
        );
        links.extend(read_links(conn, &sql, params_from_iter(batch.iter()))?);
    }
    links.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(links)
}

fn read_links<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Link>> {
    let headers = {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(HeaderRow {
                    id: row.get(0)?,
                    origin: row.get(1)?,
                    status: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    headers.into_iter().map(|row| hydrate(conn, row)).collect()
}

fn hydrate(conn: &Connection, row: HeaderRow) -> Result<Link> {
    let mut link = Link {
        sources: members(conn, AlignmentSide::Source, &row.id)?,
        targets: members(conn, AlignmentSide::Target, &row.id)?,
        meta: LinkMeta {
            origin: row.origin.parse()?,
            status: row.status.parse()?,
        },
        id: row.id,
    };
    link.normalize();
    Ok(link)
}

fn members(conn: &Connection, side: AlignmentSide, link_id: &str) -> Result<Vec<Reference>> {
    let sql = format!(
        "SELECT word_id FROM {} WHERE link_id = ?1 ORDER BY word_id",
        side.join_table()
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let keys = stmt
        .query_map([link_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    keys.iter()
        .map(|key| {
            let encoded = key.split_once(':').map_or(key.as_str(), |(_, r)| r);
            Reference::decode(encoded)
        })
        .collect()
}
