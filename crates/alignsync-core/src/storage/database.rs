//! Per-project database
//!
//! A [`ProjectDatabase`] owns the SQLite connection of one project file and
//! hands out borrowed views over it: [`LinkStore`], [`CorpusStore`] and
//! [`JournalLog`]. Only one view can be alive at a time, which keeps every
//! write on the single connection serialized.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::journal::{self, chunks, JournalLog};
use crate::models::{Corpus, Link};
use crate::storage::corpora::{self, CorpusStore};
use crate::storage::links::{self, LinkChangeListener, LinkEvent, LinkEventKind, LinkStore};
use crate::storage::schema::{init_project_schema, needs_init};
use crate::storage::StorageError;

/// An open project database
pub struct ProjectDatabase {
    project_id: String,
    path: Option<PathBuf>,
    conn: Connection,
    chunk_dir: PathBuf,
    bulk_chunk_size: usize,
    listeners: Vec<Arc<dyn LinkChangeListener>>,
}

impl ProjectDatabase {
    /// Open or create the database of `project_id` under the data directory
    pub fn open(config: &Config, project_id: &str) -> Result<Self> {
        Self::open_at(
            project_id,
            &config.project_db_path(project_id),
            config.chunk_dir(project_id),
            config.bulk_chunk_size,
        )
    }

    /// Open or create a project database at an explicit path
    pub fn open_at(
        project_id: &str,
        path: &Path,
        chunk_dir: PathBuf,
        bulk_chunk_size: usize,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        let mut db = Self::from_connection(project_id, conn, chunk_dir, bulk_chunk_size)?;
        db.path = Some(path.to_path_buf());
        debug!(project = project_id, path = ?path, "Opened project database");
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(project_id: &str, chunk_dir: PathBuf, bulk_chunk_size: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(project_id, conn, chunk_dir, bulk_chunk_size)
    }

    fn from_connection(
        project_id: &str,
        conn: Connection,
        chunk_dir: PathBuf,
        bulk_chunk_size: usize,
    ) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if needs_init(&conn) {
            init_project_schema(&conn)?;
        }
        Ok(Self {
            project_id: project_id.to_string(),
            path: None,
            conn,
            chunk_dir,
            bulk_chunk_size: bulk_chunk_size.max(1),
            listeners: Vec::new(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// File path, or `None` for an in-memory database
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Register a listener for committed link changes
    pub fn add_listener(&mut self, listener: Arc<dyn LinkChangeListener>) {
        self.listeners.push(listener);
    }

    pub fn links(&mut self) -> LinkStore<'_> {
        LinkStore::new(
            &mut self.conn,
            &self.chunk_dir,
            self.bulk_chunk_size,
            &self.listeners,
        )
    }

    pub fn corpora(&mut self) -> CorpusStore<'_> {
        CorpusStore::new(&mut self.conn)
    }

    pub fn journal(&mut self) -> JournalLog<'_> {
        JournalLog::new(&mut self.conn, &self.chunk_dir, self.bulk_chunk_size)
    }

    /// Replace corpora, words and links with a downloaded snapshot
    ///
    /// Runs in one transaction and writes no journal entries. Pending
    /// entries and their chunk files are dropped. Listeners see a `Remove`
    /// for every link the snapshot no longer has and a `Save` for the rest.
    pub fn import_snapshot(&mut self, corpora: &[Corpus], links: &[Link]) -> Result<()> {
        let links = links::prepare_lenient(links)?;

        let tx = self.conn.transaction()?;
        let prior = links::read_all_links(&tx)?;
        corpora::clear_corpora(&tx)?;
        for corpus in corpora {
            corpora::write_corpus(&tx, corpus)?;
            corpora::write_words(&tx, corpus, &corpus.words)?;
        }
        links::write_link_set(&tx, &links)?;
        tx.execute("DELETE FROM journal_entries", [])?;
        tx.commit()?;

        journal::discard_chunk_dir(&self.chunk_dir);

        let kept: HashSet<&str> = links.iter().map(|l| l.id.as_str()).collect();
        let vanished: Vec<Link> = prior
            .into_iter()
            .filter(|l| !kept.contains(l.id.as_str()))
            .collect();
        info!(
            project = %self.project_id,
            corpora = corpora.len(),
            links = links.len(),
            removed = vanished.len(),
            "Imported project snapshot"
        );
        self.notify(LinkEventKind::Remove, &vanished);
        self.notify(LinkEventKind::Save, &links);
        Ok(())
    }

    fn notify(&self, kind: LinkEventKind, links: &[Link]) {
        for link in links {
            for listener in &self.listeners {
                listener.on_change(LinkEvent {
                    kind,
                    link: link.clone(),
                });
            }
        }
    }

    /// Close the connection, reporting any pending error
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }

    /// Delete the database file and chunk directory of a project
    ///
    /// The database must not be open.
    pub fn destroy(config: &Config, project_id: &str) -> Result<()> {
        let path = config.project_db_path(project_id);
        for candidate in [
            path.clone(),
            path.with_extension("sqlite-journal"),
            path.with_extension("sqlite-wal"),
            path.with_extension("sqlite-shm"),
        ] {
            match std::fs::remove_file(&candidate) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::from_io(e, candidate).into()),
            }
        }
        chunks::remove_chunk_dir(&config.chunk_dir(project_id))?;
        info!(project = project_id, "Deleted local project data");
        Ok(())
    }
}
