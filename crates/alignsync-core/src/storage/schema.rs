//! SQLite schemas
//!
//! Two kinds of database exist: the user database (`user.db`) holding the
//! project registry and preferences, and one database per project holding
//! corpora, words, links and the change journal.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_INFO: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_info (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

/// Initialize the schema of a project database
pub fn init_project_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_INFO)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS language (
            code TEXT PRIMARY KEY,
            text_direction TEXT NOT NULL DEFAULT 'ltr',
            font_family TEXT
        );

        CREATE TABLE IF NOT EXISTS corpora (
            id TEXT PRIMARY KEY,
            side TEXT NOT NULL,
            name TEXT NOT NULL,
            full_name TEXT NOT NULL,
            file_name TEXT NOT NULL DEFAULT '',
            language_id TEXT REFERENCES language(code),
            updated_since_sync INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Words and word parts; id is "<side>:<encoded reference>"
        CREATE TABLE IF NOT EXISTS words_or_parts (
            id TEXT PRIMARY KEY,
            corpus_id TEXT NOT NULL REFERENCES corpora(id) ON DELETE CASCADE,
            side TEXT NOT NULL,
            text TEXT NOT NULL,
            after TEXT,
            gloss TEXT,
            normalized_text TEXT NOT NULL,
            position_book INTEGER NOT NULL,
            position_chapter INTEGER,
            position_verse INTEGER,
            position_word INTEGER,
            position_part INTEGER,
            source_verse_bcvid TEXT,
            language_id TEXT
        );

        -- Link headers with the denormalized searchable text
        CREATE TABLE IF NOT EXISTS links (
            id TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            status TEXT NOT NULL,
            sources_text TEXT NOT NULL DEFAULT '',
            targets_text TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS links__source_words (
            link_id TEXT NOT NULL REFERENCES links(id) ON DELETE CASCADE,
            word_id TEXT NOT NULL,
            PRIMARY KEY (link_id, word_id)
        );

        CREATE TABLE IF NOT EXISTS links__target_words (
            link_id TEXT NOT NULL REFERENCES links(id) ON DELETE CASCADE,
            word_id TEXT NOT NULL,
            PRIMARY KEY (link_id, word_id)
        );

        -- seq breaks ties between entries sharing a timestamp
        CREATE TABLE IF NOT EXISTS journal_entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            link_id TEXT,
            type TEXT NOT NULL,
            date INTEGER NOT NULL,
            body TEXT,
            bulk_insert_file TEXT
        );

        -- Reverse lookup of links by member word
        CREATE INDEX IF NOT EXISTS idx_links__source_words_word_id ON links__source_words(word_id);
        CREATE INDEX IF NOT EXISTS idx_links__target_words_word_id ON links__target_words(word_id);

        -- Concordance drill-down
        CREATE INDEX IF NOT EXISTS idx_links_texts ON links(sources_text, targets_text);

        CREATE INDEX IF NOT EXISTS idx_words_or_parts_corpus_id ON words_or_parts(corpus_id);
        CREATE INDEX IF NOT EXISTS idx_words_or_parts_normalized_text ON words_or_parts(normalized_text);

        CREATE INDEX IF NOT EXISTS idx_journal_entries_order ON journal_entries(date, seq);
        "#,
    )?;

    set_schema_version(conn)
}

/// Initialize the schema of the user database
pub fn init_user_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_INFO)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            members TEXT NOT NULL DEFAULT '[]',
            location TEXT NOT NULL,
            server_state TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_sync_time INTEGER NOT NULL DEFAULT 0,
            server_updated_at INTEGER NOT NULL DEFAULT 0,
            last_sync_server_time INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS preferences (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_projects_name ON projects(name);
        "#,
    )?;

    set_schema_version(conn)
}

fn set_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
