//! Data models for alignsync
//!
//! Defines the core data structures: Link, Word, Corpus and Project.
//! Links reference words by [`Reference`]; corpora own the words of one
//! side of the alignment.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::reference::{RefField, Reference};

/// Current time in epoch milliseconds, the unit of every project timestamp
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Which text of the alignment a word or reference belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlignmentSide {
    #[serde(rename = "sources")]
    Source,
    #[serde(rename = "targets")]
    Target,
}

impl AlignmentSide {
    pub const ALL: [AlignmentSide; 2] = [AlignmentSide::Source, AlignmentSide::Target];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentSide::Source => "sources",
            AlignmentSide::Target => "targets",
        }
    }

    /// Join table holding this side's link members
    pub(crate) fn join_table(&self) -> &'static str {
        match self {
            AlignmentSide::Source => "links__source_words",
            AlignmentSide::Target => "links__target_words",
        }
    }
}

impl fmt::Display for AlignmentSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlignmentSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sources" | "source" => Ok(AlignmentSide::Source),
            "targets" | "target" => Ok(AlignmentSide::Target),
            other => Err(Error::validation(format!("unknown alignment side '{}'", other))),
        }
    }
}

/// Storage key of a word: `"<side>:<encoded reference>"`
pub fn word_key(side: AlignmentSide, reference: &Reference) -> String {
    format!("{}:{}", side.as_str(), reference.encode())
}

/// How a link came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkOrigin {
    #[default]
    Manual,
    Machine,
}

impl LinkOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkOrigin::Manual => "manual",
            LinkOrigin::Machine => "machine",
        }
    }
}

impl FromStr for LinkOrigin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(LinkOrigin::Manual),
            "machine" => Ok(LinkOrigin::Machine),
            other => Err(Error::validation(format!("unknown link origin '{}'", other))),
        }
    }
}

/// Review status of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkStatus {
    #[default]
    Created,
    Approved,
    Rejected,
    NeedsReview,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Created => "created",
            LinkStatus::Approved => "approved",
            LinkStatus::Rejected => "rejected",
            LinkStatus::NeedsReview => "needsReview",
        }
    }
}

impl FromStr for LinkStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(LinkStatus::Created),
            "approved" => Ok(LinkStatus::Approved),
            "rejected" => Ok(LinkStatus::Rejected),
            "needsReview" => Ok(LinkStatus::NeedsReview),
            other => Err(Error::validation(format!("unknown link status '{}'", other))),
        }
    }
}

/// Link metadata, serialized as the `meta` object of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkMeta {
    #[serde(default)]
    pub origin: LinkOrigin,
    #[serde(default)]
    pub status: LinkStatus,
}

/// An alignment link between source and target words
///
/// References on each side are kept sorted in reading order without
/// duplicates, so two links with the same members compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    #[serde(default)]
    pub sources: Vec<Reference>,
    #[serde(default)]
    pub targets: Vec<Reference>,
    #[serde(default)]
    pub meta: LinkMeta,
}

impl Link {
    /// Create a new manual link with a fresh id
    pub fn new(sources: Vec<Reference>, targets: Vec<Reference>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), sources, targets)
    }

    /// Create a link with a specific ID (for loading from storage)
    pub fn with_id(id: impl Into<String>, sources: Vec<Reference>, targets: Vec<Reference>) -> Self {
        let mut link = Self {
            id: id.into(),
            sources,
            targets,
            meta: LinkMeta::default(),
        };
        link.normalize();
        link
    }

    pub fn with_status(mut self, status: LinkStatus) -> Self {
        self.meta.status = status;
        self
    }

    pub fn with_origin(mut self, origin: LinkOrigin) -> Self {
        self.meta.origin = origin;
        self
    }

    /// Members on one side
    pub fn members(&self, side: AlignmentSide) -> &[Reference] {
        match side {
            AlignmentSide::Source => &self.sources,
            AlignmentSide::Target => &self.targets,
        }
    }

    /// Sort and dedup both member lists
    pub fn normalize(&mut self) {
        self.sources.sort();
        self.sources.dedup();
        self.targets.sort();
        self.targets.dedup();
    }

    /// Check the invariants required before the link may be stored
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("link id must not be blank"));
        }
        if self.sources.is_empty() && self.targets.is_empty() {
            return Err(Error::validation(format!(
                "link '{}' has neither sources nor targets",
                self.id
            )));
        }
        for side in AlignmentSide::ALL {
            if let Some(bad) = self
                .members(side)
                .iter()
                .find(|r| !r.has_fields(RefField::Word))
            {
                return Err(Error::validation(format!(
                    "link '{}' {} reference '{}' is not word-level",
                    self.id, side, bad
                )));
            }
        }
        Ok(())
    }
}

/// Reading direction of a language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

impl TextDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextDirection::Ltr => "ltr",
            TextDirection::Rtl => "rtl",
        }
    }
}

impl FromStr for TextDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ltr" => Ok(TextDirection::Ltr),
            "rtl" => Ok(TextDirection::Rtl),
            other => Err(Error::validation(format!("unknown text direction '{}'", other))),
        }
    }
}

/// Language metadata shared by corpora
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Language {
    pub code: String,
    #[serde(default)]
    pub text_direction: TextDirection,
    #[serde(default)]
    pub font_family: Option<String>,
}

impl Language {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }
}

/// A word (or word part) of a corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub id: Reference,
    pub corpus_id: String,
    pub side: AlignmentSide,
    pub text: String,
    pub after: Option<String>,
    pub gloss: Option<String>,
    /// Encoded verse reference of the aligned source verse, if any
    pub source_verse: Option<String>,
}

impl Word {
    pub fn new(
        id: Reference,
        corpus_id: impl Into<String>,
        side: AlignmentSide,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            corpus_id: corpus_id.into(),
            side,
            text: text.into(),
            after: None,
            gloss: None,
            source_verse: None,
        }
    }

    /// Storage key of this word
    pub fn key(&self) -> String {
        word_key(self.side, &self.id)
    }

    /// Searchable form of the text
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }
}

/// Trim and lower-case text for search and aggregation
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// A text (one side of the alignment) and its words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Corpus {
    pub id: String,
    pub name: String,
    pub full_name: String,
    pub file_name: String,
    pub side: AlignmentSide,
    pub language: Language,
    pub words: Vec<Word>,
    /// Set on local word changes, cleared only by a successful sync
    pub updated_since_sync: bool,
}

impl Corpus {
    pub fn new(id: impl Into<String>, name: impl Into<String>, side: AlignmentSide, language: Language) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            full_name: name.clone(),
            name,
            file_name: String::new(),
            side,
            language,
            words: Vec::new(),
            updated_since_sync: false,
        }
    }
}

/// Where the authoritative copy of a project lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectLocation {
    /// Only on this machine
    Local,
    /// Only on the server
    Remote,
    /// On both, kept in step by sync
    Synced,
}

impl ProjectLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectLocation::Local => "LOCAL",
            ProjectLocation::Remote => "REMOTE",
            ProjectLocation::Synced => "SYNCED",
        }
    }
}

impl fmt::Display for ProjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(ProjectLocation::Local),
            "REMOTE" => Ok(ProjectLocation::Remote),
            "SYNCED" => Ok(ProjectLocation::Synced),
            other => Err(Error::validation(format!("unknown project location '{}'", other))),
        }
    }
}

/// Publication state of a project on the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectState {
    #[default]
    Draft,
    Published,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Draft => "DRAFT",
            ProjectState::Published => "PUBLISHED",
        }
    }
}

impl FromStr for ProjectState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(ProjectState::Draft),
            "PUBLISHED" => Ok(ProjectState::Published),
            other => Err(Error::validation(format!("unknown project state '{}'", other))),
        }
    }
}

/// A registered alignment project
///
/// All timestamps are epoch milliseconds; zero means "never".
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
    pub location: ProjectLocation,
    pub server_state: Option<ProjectState>,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_sync_time: i64,
    pub server_updated_at: i64,
    pub last_sync_server_time: i64,
    /// Corpus metadata, hydrated from the project database on demand
    pub corpora: Vec<Corpus>,
}

impl Project {
    /// Create a new local project
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name)
    }

    /// Create a project with a specific ID (for loading from storage)
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            members: Vec::new(),
            location: ProjectLocation::Local,
            server_state: None,
            created_at: now,
            updated_at: now,
            last_sync_time: 0,
            server_updated_at: 0,
            last_sync_server_time: 0,
            corpora: Vec::new(),
        }
    }

    /// Record a local modification
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at);
    }

    /// Whether a sync would have anything to do
    ///
    /// True when the local copy changed since the last sync, the server
    /// copy changed since we last saw it, or any corpus carries unsent
    /// word changes.
    pub fn is_sync_eligible(&self) -> bool {
        self.updated_at > self.last_sync_time
            || self.server_updated_at > self.last_sync_server_time
            || self.corpora.iter().any(|c| c.updated_since_sync)
    }

    /// Corpora of one side
    pub fn corpora_on(&self, side: AlignmentSide) -> impl Iterator<Item = &Corpus> {
        self.corpora.iter().filter(move |c| c.side == side)
    }
}
