//! alignsync Core Library
//!
//! This crate provides the core functionality for alignsync, which stores
//! word-level alignment links between a source and a target text and keeps
//! them in step with a remote alignment service.
//!
//! # Architecture
//!
//! - **SQLite**: one database per project (corpora, words, links, journal)
//!   plus a user database holding the project registry
//! - **Journal**: every link change is recorded in the same transaction as
//!   the change itself and drained to the server in bounded units
//!
//! # Quick Start
//!
//! ```text
//! let mut workspace = Workspace::open(Config::load()?)?;
//! let project = workspace.create_project("Ruth", &corpora)?;
//!
//! // Align two words
//! let link = Link::new(vec![Reference::decode("08001001001")?], vec![Reference::decode("08001001001")?]);
//! workspace.save_links(&project.id, &[link])?;
//!
//! // Send it to the server
//! let coordinator = SyncCoordinator::new(workspace, Arc::new(HttpRemote::new(url, timeout)?));
//! coordinator.sync(&project.id, CancellationToken::new()).await?;
//! ```
//!
//! # Modules
//!
//! - `reference`: fixed-width, order-preserving text positions
//! - `models`: links, words, corpora and projects
//! - `storage`: SQLite storage (registry, project databases, link store)
//! - `journal`: change journal, link diffs and bulk chunk files
//! - `index`: pivot-word index maintained from link changes
//! - `workspace`: entry point to local data
//! - `sync`: remote service client and sync coordinator
//! - `alignment_file`: JSON import/export of link sets
//! - `config`: Application configuration

pub mod alignment_file;
pub mod config;
pub mod error;
pub mod index;
pub mod journal;
pub mod models;
pub mod reference;
pub mod storage;
pub mod sync;
pub mod workspace;

pub use alignment_file::{check_alignment_file, AlignmentFile, AlignmentFileCheck};
pub use config::Config;
pub use error::{Error, Result};
pub use index::{PivotWord, PivotWordIndex, PivotWordSort};
pub use journal::{JournalEntry, JournalEntryType, LinkDiff};
pub use models::{
    AlignmentSide, Corpus, Language, Link, LinkOrigin, LinkStatus, Project, ProjectLocation,
    ProjectState, Word,
};
pub use reference::Reference;
pub use storage::{ProjectDatabase, ProjectRegistry, StorageError};
pub use sync::{HttpRemote, RemoteService, SyncCoordinator, SyncEvent, SyncOutcome};
pub use workspace::Workspace;
