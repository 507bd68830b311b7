//! Corpus, language and word storage
//!
//! Words are keyed like link members (`"<side>:<reference>"`) so that a
//! link's join rows resolve directly to word rows.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{now_millis, AlignmentSide, Corpus, Language, Word};
use crate::reference::Reference;
use crate::storage::links;

/// View over the corpora of one project database
pub struct CorpusStore<'a> {
    conn: &'a mut Connection,
}

const CORPUS_COLUMNS: &str = "c.id, c.side, c.name, c.full_name, c.file_name, c.updated_since_sync,
     l.code, l.text_direction, l.font_family";

const WORD_COLUMNS: &str = "id, corpus_id, side, text, after, gloss, source_verse_bcvid";

impl<'a> CorpusStore<'a> {
    pub(crate) fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Upsert a corpus, its language and any words it carries
    ///
    /// The `updated_since_sync` flag is stored as given.
    pub fn save_corpus(&mut self, corpus: &Corpus) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_corpus(&tx, corpus)?;
        write_words(&tx, corpus, &corpus.words)?;
        tx.commit()?;
        debug!(corpus = %corpus.id, words = corpus.words.len(), "Saved corpus");
        Ok(())
    }

    /// Record local word edits
    ///
    /// Flags the owning corpora as changed since the last sync and refreshes
    /// the cached text of links that reference the words.
    pub fn update_words(&mut self, words: &[Word]) -> Result<usize> {
        if words.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut keys = Vec::with_capacity(words.len());
        for word in words {
            let corpus = read_corpus(&tx, &word.corpus_id)?
                .ok_or_else(|| Error::NotFound(format!("corpus '{}'", word.corpus_id)))?;
            if corpus.side != word.side {
                return Err(Error::validation(format!(
                    "word {} is on {} but corpus '{}' is on {}",
                    word.id, word.side, corpus.id, corpus.side
                )));
            }
            write_words(&tx, &corpus, std::slice::from_ref(word))?;
            tx.execute(
                "UPDATE corpora SET updated_since_sync = 1, updated_at = ?2 WHERE id = ?1",
                params![corpus.id, now_millis()],
            )?;
            keys.push(word.key());
        }
        links::refresh_links_with_words(&tx, &keys)?;
        tx.commit()?;
        Ok(words.len())
    }

    /// Corpus metadata, without words, ordered by side then id
    pub fn corpora(&self) -> Result<Vec<Corpus>> {
        let sql = format!(
            "SELECT {} FROM corpora c LEFT JOIN language l ON l.code = c.language_id
             ORDER BY c.side, c.id",
            CORPUS_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], corpus_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(CorpusRow::into_corpus).collect()
    }

    /// One corpus's metadata
    pub fn corpus(&self, id: &str) -> Result<Option<Corpus>> {
        read_corpus(self.conn, id)
    }

    /// Words of a corpus in reading order
    pub fn words(&self, corpus_id: &str) -> Result<Vec<Word>> {
        read_words(
            self.conn,
            &format!("SELECT {} FROM words_or_parts WHERE corpus_id = ?1 ORDER BY id", WORD_COLUMNS),
            [corpus_id],
        )
    }

    /// Words of every corpus flagged as changed since the last sync
    pub fn flagged_words(&self) -> Result<Vec<Word>> {
        read_words(
            self.conn,
            &format!(
                "SELECT {} FROM words_or_parts WHERE corpus_id IN
                 (SELECT id FROM corpora WHERE updated_since_sync = 1) ORDER BY id",
                WORD_COLUMNS
            ),
            [],
        )
    }

    /// Every word of the project
    pub fn all_words(&self) -> Result<Vec<Word>> {
        read_words(
            self.conn,
            &format!("SELECT {} FROM words_or_parts ORDER BY id", WORD_COLUMNS),
            [],
        )
    }

    pub fn word(&self, side: AlignmentSide, reference: &Reference) -> Result<Option<Word>> {
        let mut words = read_words(
            self.conn,
            &format!("SELECT {} FROM words_or_parts WHERE id = ?1", WORD_COLUMNS),
            [crate::models::word_key(side, reference)],
        )?;
        Ok(words.pop())
    }

    pub fn word_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM words_or_parts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether any corpus carries unsent word changes
    pub fn has_unsynced_changes(&self) -> Result<bool> {
        let flagged: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM corpora WHERE updated_since_sync = 1)",
            [],
            |row| row.get(0),
        )?;
        Ok(flagged)
    }

    /// Clear `updated_since_sync` on every corpus
    ///
    /// Only a successful sync may call this.
    pub(crate) fn clear_sync_flags(&mut self) -> Result<()> {
        self.conn
            .execute("UPDATE corpora SET updated_since_sync = 0", [])?;
        Ok(())
    }

    /// Set `updated_since_sync` on the given corpora
    pub(crate) fn restore_sync_flags(&mut self, corpus_ids: &[String]) -> Result<()> {
        for id in corpus_ids {
            self.conn.execute(
                "UPDATE corpora SET updated_since_sync = 1 WHERE id = ?1",
                [id],
            )?;
        }
        Ok(())
    }

    pub fn language(&self, code: &str) -> Result<Option<Language>> {
        let language = self
            .conn
            .query_row(
                "SELECT code, text_direction, font_family FROM language WHERE code = ?1",
                [code],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;
        language
            .map(|(code, direction, font_family)| {
                Ok(Language {
                    code,
                    text_direction: direction.parse()?,
                    font_family,
                })
            })
            .transpose()
    }
}

pub(crate) fn write_corpus(conn: &Connection, corpus: &Corpus) -> Result<()> {
    if corpus.id.trim().is_empty() {
        return Err(Error::validation("corpus id must not be blank"));
    }
    let language_id = if corpus.language.code.is_empty() {
        None
    } else {
        conn.execute(
            "INSERT INTO language (code, text_direction, font_family) VALUES (?1, ?2, ?3)
             ON CONFLICT(code) DO UPDATE SET text_direction = ?2, font_family = ?3",
            params![
                corpus.language.code,
                corpus.language.text_direction.as_str(),
                corpus.language.font_family
            ],
        )?;
        Some(corpus.language.code.as_str())
    };

    let now = now_millis();
    conn.execute(
        "INSERT INTO corpora (id, side, name, full_name, file_name, language_id, updated_since_sync, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(id) DO UPDATE SET side = ?2, name = ?3, full_name = ?4, file_name = ?5,
             language_id = ?6, updated_since_sync = ?7, updated_at = ?8",
        params![
            corpus.id,
            corpus.side.as_str(),
            corpus.name,
            corpus.full_name,
            corpus.file_name,
            language_id,
            corpus.updated_since_sync,
            now
        ],
    )?;
    Ok(())
}

pub(crate) fn write_words(conn: &Connection, corpus: &Corpus, words: &[Word]) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO words_or_parts
         (id, corpus_id, side, text, after, gloss, normalized_text,
          position_book, position_chapter, position_verse, position_word, position_part,
          source_verse_bcvid, language_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )?;
    let language_id = (!corpus.language.code.is_empty()).then_some(corpus.language.code.as_str());
    for word in words {
        if word.side != corpus.side {
            return Err(Error::validation(format!(
                "word {} is on {} but corpus '{}' is on {}",
                word.id, word.side, corpus.id, corpus.side
            )));
        }
        stmt.execute(params![
            word.key(),
            corpus.id,
            word.side.as_str(),
            word.text,
            word.after,
            word.gloss,
            word.normalized_text(),
            word.id.book_number(),
            word.id.chapter(),
            word.id.verse_number(),
            word.id.word_number(),
            word.id.part(),
            word.source_verse,
            language_id
        ])?;
    }
    Ok(())
}

/// Remove every corpus, word and language row
pub(crate) fn clear_corpora(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM words_or_parts", [])?;
    conn.execute("DELETE FROM corpora", [])?;
    conn.execute("DELETE FROM language", [])?;
    Ok(())
}

struct CorpusRow {
    id: String,
    side: String,
    name: String,
    full_name: String,
    file_name: String,
    updated_since_sync: bool,
    language_code: Option<String>,
    text_direction: Option<String>,
    font_family: Option<String>,
}

impl CorpusRow {
    fn into_corpus(self) -> Result<Corpus> {
        let language = match self.language_code {
            Some(code) => Language {
                code,
                text_direction: self.text_direction.as_deref().unwrap_or("ltr").parse()?,
                font_family: self.font_family,
            },
            None => Language::default(),
        };
        Ok(Corpus {
            id: self.id,
            name: self.name,
            full_name: self.full_name,
            file_name: self.file_name,
            side: self.side.parse()?,
            language,
            words: Vec::new(),
            updated_since_sync: self.updated_since_sync,
        })
    }
}

fn corpus_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CorpusRow> {
    Ok(CorpusRow {
        id: row.get(0)?,
        side: row.get(1)?,
        name: row.get(2)?,
        full_name: row.get(3)?,
        file_name: row.get(4)?,
        updated_since_sync: row.get(5)?,
        language_code: row.get(6)?,
        text_direction: row.get(7)?,
        font_family: row.get(8)?,
    })
}

fn read_corpus(conn: &Connection, id: &str) -> Result<Option<Corpus>> {
    let sql = format!(
        "SELECT {} FROM corpora c LEFT JOIN language l ON l.code = c.language_id WHERE c.id = ?1",
        CORPUS_COLUMNS
    );
    let row = conn.query_row(&sql, [id], corpus_row).optional()?;
    row.map(CorpusRow::into_corpus).transpose()
}

fn read_words<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Word>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(key, corpus_id, side, text, after, gloss, source_verse)| {
            let encoded = key.split_once(':').map_or(key.as_str(), |(_, r)| r);
            Ok(Word {
                id: Reference::decode(encoded)?,
                corpus_id,
                side: side.parse()?,
                text,
                after,
                gloss,
                source_verse,
            })
        })
        .collect()
}
