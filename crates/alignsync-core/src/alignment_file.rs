//! Alignment data files
//!
//! The JSON exchange format for link sets:
//!
//! ```text
//! { "type": "translation",
//!   "meta": { "creator": "alignsync" },
//!   "records": [ { "id": "...", "source": ["400010010011"], "target": ["40001001001"],
//!                  "meta": { "origin": "manual", "status": "created" } } ] }
//! ```
//!
//! Importing is lenient: every record is checked on its own, invalid records
//! are reported and skipped, and valid ones become links.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Link, LinkMeta, LinkOrigin, LinkStatus};
use crate::reference::{RefField, Reference};

pub const DEFAULT_FILE_TYPE: &str = "translation";
pub const DEFAULT_CREATOR: &str = "alignsync";

/// Document-level metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMeta {
    #[serde(default)]
    pub creator: String,
}

/// Optional per-record metadata
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<LinkOrigin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LinkStatus>,
}

/// One link in file form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<RecordMeta>,
}

/// An alignment data file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentFile {
    #[serde(rename = "type", default)]
    pub file_type: String,
    #[serde(default)]
    pub meta: FileMeta,
    #[serde(default)]
    pub records: Vec<AlignmentRecord>,
}

impl AlignmentFile {
    /// Export form of a link set
    pub fn from_links(links: &[Link]) -> Self {
        Self {
            file_type: DEFAULT_FILE_TYPE.to_string(),
            meta: FileMeta {
                creator: DEFAULT_CREATOR.to_string(),
            },
            records: links
                .iter()
                .map(|link| AlignmentRecord {
                    id: Some(link.id.clone()),
                    source: link.sources.iter().map(Reference::encode).collect(),
                    target: link.targets.iter().map(Reference::encode).collect(),
                    meta: Some(RecordMeta {
                        id: None,
                        origin: Some(link.meta.origin),
                        status: Some(link.meta.status),
                    }),
                })
                .collect(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Result of checking an input file
#[derive(Debug, Clone, Default)]
pub struct AlignmentFileCheck {
    /// False when the input is not JSON, has no records, or any record was rejected
    pub is_file_valid: bool,
    /// At most `max_error_messages` messages
    pub error_messages: Vec<String>,
    pub submitted_links: usize,
    pub accepted_links: usize,
    pub rejected_links: usize,
    pub file_type: String,
    pub creator: String,
    /// Links built from the accepted records
    pub links: Vec<Link>,
}

impl AlignmentFileCheck {
    fn error(&mut self, max: usize, message: String) {
        if self.error_messages.len() < max {
            self.error_messages.push(message);
        }
    }
}

/// Validate an alignment file and convert its valid records to links
pub fn check_alignment_file(input: &str, max_error_messages: usize) -> AlignmentFileCheck {
    let mut result = AlignmentFileCheck::default();

    let json: Value = match serde_json::from_str(input) {
        Ok(json) => json,
        Err(e) => {
            result.error(max_error_messages, format!("Input file is not valid JSON: {}", e));
            return result;
        }
    };

    result.is_file_valid = true;
    result.file_type = json["type"].as_str().unwrap_or_default().to_string();
    result.creator = json["meta"]["creator"].as_str().unwrap_or_default().to_string();

    let records = match json["records"].as_array() {
        Some(records) if !records.is_empty() => records,
        _ => {
            result.is_file_valid = false;
            result.error(
                max_error_messages,
                "Input file has no alignment links (missing/empty \"records\" field).".to_string(),
            );
            return result;
        }
    };

    result.submitted_links = records.len();
    for (index, value) in records.iter().enumerate() {
        match check_record(index + 1, value) {
            Ok(link) => {
                result.links.push(link);
                result.accepted_links += 1;
            }
            Err(messages) => {
                result.is_file_valid = false;
                result.rejected_links += 1;
                for message in messages {
                    result.error(max_error_messages, message);
                }
            }
        }
    }
    result
}

fn check_record(number: usize, value: &Value) -> Result<Link, Vec<String>> {
    let mut errors = Vec::new();

    let record: AlignmentRecord = match serde_json::from_value(value.clone()) {
        Ok(record) => record,
        Err(e) => return Err(vec![format!("Link #{} is malformed: {}", number, e)]),
    };

    let sources = parse_refs(number, "source", &record.source, &mut errors);
    let targets = parse_refs(number, "target", &record.target, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    let meta = record.meta.unwrap_or_default();
    let id = record
        .id
        .or(meta.id)
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut link = Link::with_id(id, sources, targets);
    link.meta = LinkMeta {
        origin: meta.origin.unwrap_or_default(),
        status: meta.status.unwrap_or_default(),
    };
    Ok(link)
}

fn parse_refs(number: usize, field: &str, raw: &[String], errors: &mut Vec<String>) -> Vec<Reference> {
    if raw.is_empty() {
        errors.push(format!(
            "Link #{} has no {} tokens (missing/empty \"{}\" field).",
            number, field, field
        ));
        return Vec::new();
    }
    let mut refs = Vec::with_capacity(raw.len());
    for token in raw {
        match Reference::decode(token) {
            Ok(r) if r.has_fields(RefField::Word) => refs.push(r),
            Ok(_) => errors.push(format!(
                "Link #{} {} token '{}' does not name a word.",
                number, field, token
            )),
            Err(e) => errors.push(format!("Link #{} {} token '{}': {}", number, field, token, e)),
        }
    }
    refs
}
