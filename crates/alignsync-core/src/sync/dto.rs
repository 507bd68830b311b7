//! Wire types of the remote service
//!
//! All payloads are camelCase JSON. Links travel in their storage shape
//! (`{id, sources, targets, meta}` with encoded references), so [`Link`]
//! is used directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::journal::{JournalBody, JournalEntry, JournalEntryType, LinkDiff, PatchOperation};
use crate::models::{AlignmentSide, Corpus, Language, Link, Project, ProjectLocation, ProjectState, Word};
use crate::reference::Reference;

/// Project metadata as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDto {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ProjectState>,
    #[serde(default)]
    pub corpora: Vec<CorpusDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<i64>,
}

impl ProjectDto {
    /// Wire form of a project and its (hydrated) corpora
    pub fn from_project(project: &Project, state: ProjectState) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            members: project.members.clone(),
            state: Some(state),
            corpora: project.corpora.iter().map(CorpusDto::from).collect(),
            updated_at: Some(project.updated_at),
            last_sync_time: Some(project.last_sync_time),
        }
    }

    /// Registry form of a server project
    ///
    /// The server's `updatedAt` becomes `server_updated_at`; corpora come
    /// back without words.
    pub fn into_project(self, location: ProjectLocation) -> Project {
        let mut project = Project::with_id(self.id, self.name);
        project.members = self.members;
        project.location = location;
        project.server_state = self.state;
        if let Some(updated_at) = self.updated_at {
            project.server_updated_at = updated_at;
        }
        project.corpora = self.corpora.into_iter().map(CorpusDto::into_corpus).collect();
        project
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusDto {
    pub id: String,
    pub name: String,
    pub side: AlignmentSide,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub language_code: String,
}

impl From<&Corpus> for CorpusDto {
    fn from(corpus: &Corpus) -> Self {
        Self {
            id: corpus.id.clone(),
            name: corpus.name.clone(),
            side: corpus.side,
            full_name: corpus.full_name.clone(),
            file_name: corpus.file_name.clone(),
            language: corpus.language.clone(),
            language_code: corpus.language.code.clone(),
        }
    }
}

impl CorpusDto {
    pub fn into_corpus(self) -> Corpus {
        let mut language = self.language;
        if language.code.is_empty() {
            language.code = self.language_code;
        }
        let mut corpus = Corpus::new(self.id, self.name, self.side, language);
        if !self.full_name.is_empty() {
            corpus.full_name = self.full_name;
        }
        corpus.file_name = self.file_name;
        corpus
    }
}

/// One word of a corpus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDto {
    pub id: String,
    pub side: AlignmentSide,
    pub corpus_id: String,
    pub text: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub gloss: String,
    #[serde(default)]
    pub source_verse_bcv: String,
}

impl From<&Word> for TokenDto {
    fn from(word: &Word) -> Self {
        Self {
            id: word.id.encode(),
            side: word.side,
            corpus_id: word.corpus_id.clone(),
            text: word.text.clone(),
            after: word.after.clone().unwrap_or_default(),
            gloss: word.gloss.clone().unwrap_or_default(),
            source_verse_bcv: word.source_verse.clone().unwrap_or_default(),
        }
    }
}

impl TryFrom<TokenDto> for Word {
    type Error = Error;

    fn try_from(token: TokenDto) -> Result<Self> {
        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };
        Ok(Word {
            id: Reference::decode(&token.id)?,
            corpus_id: token.corpus_id,
            side: token.side,
            text: token.text,
            after: non_empty(token.after),
            gloss: non_empty(token.gloss),
            source_verse: non_empty(token.source_verse_bcv),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokensResponse {
    #[serde(default)]
    pub tokens: Vec<TokenDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinksResponse {
    #[serde(default)]
    pub links: Vec<Link>,
}

/// A journal entry as uploaded
///
/// `body` depends on `type`: a link for CREATE and DELETE, a JSON-Patch
/// operation list for UPDATE and an array of links for BULK_INSERT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntryDto {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: JournalEntryType,
    /// Epoch milliseconds
    pub date: i64,
    pub body: Value,
}

/// Decoded body of a [`JournalEntryDto`]
#[derive(Debug, Clone, PartialEq)]
pub enum JournalPayload {
    Link(Link),
    Diff(LinkDiff),
    Links(Vec<Link>),
}

impl JournalEntryDto {
    /// Wire form of a stored entry
    ///
    /// `chunk` must hold the chunk file's links for BULK_INSERT entries.
    pub fn from_entry(entry: &JournalEntry, chunk: Option<&[Link]>) -> Result<Self> {
        let body = match (&entry.body, chunk) {
            (JournalBody::Link(link), _) => serde_json::to_value(link)?,
            (JournalBody::Diff(diff), _) => serde_json::to_value(diff.to_patch())?,
            (JournalBody::Chunk, Some(links)) => serde_json::to_value(links)?,
            (JournalBody::Chunk, None) => {
                return Err(Error::validation(format!(
                    "bulk entry '{}' needs its chunk to be sent",
                    entry.id
                )))
            }
        };
        Ok(Self {
            id: entry.id.clone(),
            link_id: entry.link_id.clone(),
            entry_type: entry.entry_type,
            date: entry.date,
            body,
        })
    }

    pub fn payload(&self) -> Result<JournalPayload> {
        Ok(match self.entry_type {
            JournalEntryType::Create | JournalEntryType::Delete => {
                JournalPayload::Link(serde_json::from_value(self.body.clone())?)
            }
            JournalEntryType::Update => {
                let operations: Vec<PatchOperation> = serde_json::from_value(self.body.clone())?;
                JournalPayload::Diff(LinkDiff::from_patch(&operations)?)
            }
            JournalEntryType::BulkInsert => JournalPayload::Links(serde_json::from_value(self.body.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinkStatus, TextDirection};

    fn r(w: u16) -> Reference {
        Reference::word(1, 1, 1, w).unwrap()
    }

    #[test]
    fn test_project_dto_wire_shape() {
        let mut project = Project::with_id("p1", "Ruth");
        let mut language = Language::new("heb");
        language.text_direction = TextDirection::Rtl;
        project.corpora.push(Corpus::new("wlc", "WLC", AlignmentSide::Source, language));

        let json = serde_json::to_value(ProjectDto::from_project(&project, ProjectState::Draft)).unwrap();
        assert_eq!(json["state"], "DRAFT");
        assert_eq!(json["corpora"][0]["side"], "sources");
        assert_eq!(json["corpora"][0]["languageCode"], "heb");
        assert_eq!(json["corpora"][0]["language"]["textDirection"], "rtl");
        assert!(json["updatedAt"].is_i64());
    }

    #[test]
    fn test_server_project_becomes_registry_entry() {
        let dto: ProjectDto = serde_json::from_str(
            r#"{"id": "p9", "name": "Jonah", "state": "PUBLISHED", "updatedAt": 1700,
                "corpora": [{"id": "c", "name": "C", "side": "targets", "languageCode": "eng"}]}"#,
        )
        .unwrap();
        let project = dto.into_project(ProjectLocation::Remote);

        assert_eq!(project.location, ProjectLocation::Remote);
        assert_eq!(project.server_state, Some(ProjectState::Published));
        assert_eq!(project.server_updated_at, 1700);
        assert_eq!(project.corpora[0].language.code, "eng");
        assert_eq!(project.corpora[0].full_name, "C");
    }

    #[test]
    fn test_token_conversion() {
        let token: TokenDto = serde_json::from_str(
            r#"{"id": "n01001001002", "side": "sources", "corpusId": "wlc", "text": "bara",
                "after": " ", "gloss": "", "sourceVerseBcv": ""}"#,
        )
        .unwrap();
        let word = Word::try_from(token).unwrap();
        assert_eq!(word.id, Reference::word(1, 1, 1, 2).unwrap());
        assert_eq!(word.after.as_deref(), Some(" "));
        assert_eq!(word.gloss, None);

        let back = TokenDto::from(&word);
        assert_eq!(back.id, "01001001002");
        assert_eq!(back.source_verse_bcv, "");
    }

    #[test]
    fn test_bad_token_reference_is_rejected() {
        let token = TokenDto {
            id: "1x".into(),
            side: AlignmentSide::Target,
            corpus_id: "c".into(),
            text: "t".into(),
            after: String::new(),
            gloss: String::new(),
            source_verse_bcv: String::new(),
        };
        assert!(matches!(Word::try_from(token), Err(Error::Validation(_))));
    }

    #[test]
    fn test_update_entry_travels_as_patch() {
        let old = Link::with_id("l1", vec![r(1)], vec![r(1)]);
        let new = old.clone().with_status(LinkStatus::Approved);
        let entry = JournalEntry {
            id: "e1".into(),
            link_id: Some("l1".into()),
            entry_type: JournalEntryType::Update,
            date: 5,
            body: JournalBody::Diff(LinkDiff::between(&old, &new)),
            bulk_insert_file: None,
        };

        let dto = JournalEntryDto::from_entry(&entry, None).unwrap();
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["type"], "UPDATE");
        assert_eq!(json["linkId"], "l1");
        assert_eq!(json["body"][0]["op"], "replace");
        assert_eq!(json["body"][0]["path"], "/meta/status");

        match dto.payload().unwrap() {
            JournalPayload::Diff(diff) => {
                let mut patched = old.clone();
                diff.apply(&mut patched);
                assert_eq!(patched, new);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_bulk_entry_needs_chunk() {
        let entry = JournalEntry {
            id: "b1".into(),
            link_id: None,
            entry_type: JournalEntryType::BulkInsert,
            date: 1,
            body: JournalBody::Chunk,
            bulk_insert_file: Some("bulk_insert_b1.json".into()),
        };
        assert!(JournalEntryDto::from_entry(&entry, None).is_err());

        let links = vec![Link::with_id("l1", vec![r(1)], vec![r(2)])];
        let dto = JournalEntryDto::from_entry(&entry, Some(&links)).unwrap();
        assert_eq!(dto.payload().unwrap(), JournalPayload::Links(links));
    }
}
