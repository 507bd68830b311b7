//! Storage layer
//!
//! SQLite persistence for projects.
//!
//! ## Databases
//!
//! - **user.db**: project registry and user preferences
//! - **projects/<id>.sqlite**: corpora, words, links and the change journal
//!
//! A project database is opened as a [`ProjectDatabase`], which hands out
//! [`LinkStore`], [`CorpusStore`] and journal views over one connection.

pub mod corpora;
pub mod database;
pub mod error;
pub mod links;
pub mod registry;
pub mod schema;

pub use corpora::CorpusStore;
pub use database::ProjectDatabase;
pub use error::{StorageError, StorageResult};
pub use links::{LinkChangeListener, LinkEvent, LinkEventKind, LinkStore, ReplaceSummary};
pub use registry::ProjectRegistry;
pub use schema::{init_project_schema, init_user_schema, needs_init, SCHEMA_VERSION};
