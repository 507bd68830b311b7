//! Positional references (book/chapter/verse/word/part)
//!
//! A [`Reference`] addresses a position in a linear text. Its canonical
//! string form is fixed-width so that plain string comparison follows
//! reading order:
//!
//! ```text
//! BB CCC VVV WWW P
//! 01 001 001 003 1   ->  "010010010031"
//! ```
//!
//! Trailing fields that are absent are omitted, which makes a verse-level
//! reference a strict prefix of every word-level reference inside it.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Field boundaries of the encoded form; the value is the string length
/// up to and including that field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RefField {
    Book = 2,
    Chapter = 5,
    Verse = 8,
    Word = 11,
    Part = 12,
}

impl RefField {
    /// Length of the encoded prefix ending with this field
    pub fn end(self) -> usize {
        self as usize
    }
}

const MAX_BOOK: u16 = 99;
const MAX_SEGMENT: u16 = 999;
const MAX_PART: u16 = 9;

/// A hierarchical text position
///
/// A field may only be present when every coarser field is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference {
    book: u8,
    chapter: Option<u16>,
    verse: Option<u16>,
    word: Option<u16>,
    part: Option<u8>,
}

impl Reference {
    /// Build a reference from raw field values, validating ranges and the
    /// field hierarchy
    pub fn from_parts(
        book: u16,
        chapter: Option<u16>,
        verse: Option<u16>,
        word: Option<u16>,
        part: Option<u16>,
    ) -> Result<Self> {
        check_range("book", book, MAX_BOOK)?;
        let fields = [
            ("chapter", chapter, MAX_SEGMENT),
            ("verse", verse, MAX_SEGMENT),
            ("word", word, MAX_SEGMENT),
            ("part", part, MAX_PART),
        ];

        let mut parent_present = true;
        for (name, value, max) in fields {
            match value {
                Some(v) if !parent_present => {
                    return Err(Error::validation(format!(
                        "{} {} given without its enclosing fields",
                        name, v
                    )));
                }
                Some(v) => check_range(name, v, max)?,
                None => parent_present = false,
            }
        }

        Ok(Self {
            book: book as u8,
            chapter,
            verse,
            word,
            part: part.map(|p| p as u8),
        })
    }

    /// Reference to a whole book
    pub fn book(book: u16) -> Result<Self> {
        Self::from_parts(book, None, None, None, None)
    }

    /// Reference to a verse
    pub fn verse(book: u16, chapter: u16, verse: u16) -> Result<Self> {
        Self::from_parts(book, Some(chapter), Some(verse), None, None)
    }

    /// Reference to a word
    pub fn word(book: u16, chapter: u16, verse: u16, word: u16) -> Result<Self> {
        Self::from_parts(book, Some(chapter), Some(verse), Some(word), None)
    }

    /// The same word narrowed to one of its parts
    pub fn with_part(self, part: u16) -> Result<Self> {
        Self::from_parts(
            self.book as u16,
            self.chapter,
            self.verse,
            self.word,
            Some(part),
        )
    }

    pub fn book_number(&self) -> u8 {
        self.book
    }

    pub fn chapter(&self) -> Option<u16> {
        self.chapter
    }

    pub fn verse_number(&self) -> Option<u16> {
        self.verse
    }

    pub fn word_number(&self) -> Option<u16> {
        self.word
    }

    pub fn part(&self) -> Option<u8> {
        self.part
    }

    /// Whether every field up to and including `level` is present
    pub fn has_fields(&self, level: RefField) -> bool {
        match level {
            RefField::Book => true,
            RefField::Chapter => self.chapter.is_some(),
            RefField::Verse => self.verse.is_some(),
            RefField::Word => self.word.is_some(),
            RefField::Part => self.part.is_some(),
        }
    }

    /// Fixed-width, order-preserving string form
    pub fn encode(&self) -> String {
        let mut out = format!("{:02}", self.book);
        if let Some(chapter) = self.chapter {
            out.push_str(&format!("{:03}", chapter));
        }
        if let Some(verse) = self.verse {
            out.push_str(&format!("{:03}", verse));
        }
        if let Some(word) = self.word {
            out.push_str(&format!("{:03}", word));
        }
        if let Some(part) = self.part {
            out.push_str(&part.to_string());
        }
        out
    }

    /// Parse the encoded form produced by [`Reference::encode`]
    ///
    /// Surrounding whitespace, a single leading `o`/`n` marker and
    /// all-blank trailing fields are tolerated.
    pub fn decode(reference: &str) -> Result<Self> {
        let sanitized = sanitize(reference);
        let len = sanitized.len();
        if len < RefField::Book.end() {
            return Err(Error::validation(format!(
                "reference '{}' is too short",
                reference
            )));
        }
        if !sanitized.is_ascii() || !FIELD_ENDS.contains(&len) {
            return Err(Error::validation(format!(
                "reference '{}' does not end on a field boundary",
                reference
            )));
        }

        let mut values: [Option<u16>; 5] = [None; 5];
        let mut start = 0;
        for (slot, end) in FIELD_ENDS.iter().copied().enumerate() {
            if end > len {
                break;
            }
            values[slot] = parse_field(reference, &sanitized[start..end])?;
            start = end;
        }

        let book = values[0].ok_or_else(|| {
            Error::validation(format!("reference '{}' has no book", reference))
        })?;
        Self::from_parts(book, values[1], values[2], values[3], values[4])
    }

    /// Prefix of the encoded form through the given field boundary
    pub fn truncate(&self, level: RefField) -> String {
        let mut encoded = self.encode();
        encoded.truncate(level.end());
        encoded
    }

    /// Whether both references agree up to the given field boundary
    pub fn matches_truncated(&self, other: &Reference, level: RefField) -> bool {
        self.truncate(level) == other.truncate(level)
    }

    /// `B C:V W/P` form for display to people
    pub fn human_readable(&self) -> String {
        let mut out = format!("{}", self.book);
        match (self.chapter, self.verse) {
            (Some(c), Some(v)) => out.push_str(&format!(" {}:{}", c, v)),
            (Some(c), None) => out.push_str(&format!(" {}", c)),
            _ => {}
        }
        if let Some(word) = self.word {
            out.push_str(&format!(" {}", word));
            if let Some(part) = self.part {
                out.push_str(&format!("/{}", part));
            }
        }
        out
    }
}

const FIELD_ENDS: [usize; 5] = [
    RefField::Book as usize,
    RefField::Chapter as usize,
    RefField::Verse as usize,
    RefField::Word as usize,
    RefField::Part as usize,
];

/// Strip whitespace and the optional single marker character used by some
/// external producers (`o`/`n` followed by a digit)
pub fn sanitize(reference: &str) -> &str {
    let trimmed = reference.trim();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some('o' | 'O' | 'n' | 'N'), Some(d)) if d.is_ascii_digit() => &trimmed[1..],
        _ => trimmed,
    }
}

/// Cheap pre-check used before attempting a full decode
pub fn is_valid_string(reference: &str) -> bool {
    let sanitized = sanitize(reference);
    sanitized.len() > 1 && sanitized.starts_with(|c: char| c.is_ascii_digit())
}

/// Field-by-field comparison, absent fields treated as 0
pub fn compare(a: &Reference, b: &Reference) -> Ordering {
    let key = |r: &Reference| {
        [
            r.book as u16,
            r.chapter.unwrap_or(0),
            r.verse.unwrap_or(0),
            r.word.unwrap_or(0),
            r.part.map(u16::from).unwrap_or(0),
        ]
    };
    key(a).cmp(&key(b))
}

fn check_range(name: &str, value: u16, max: u16) -> Result<()> {
    if value == 0 || value > max {
        return Err(Error::validation(format!(
            "{} {} is outside 1..={}",
            name, value, max
        )));
    }
    Ok(())
}

fn parse_field(reference: &str, field: &str) -> Result<Option<u16>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::validation(format!(
            "reference '{}' has a non-numeric field '{}'",
            reference, field
        )));
    }
    field
        .parse()
        .map(Some)
        .map_err(|_| Error::validation(format!("reference '{}' is malformed", reference)))
}

impl Ord for Reference {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl PartialOrd for Reference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Reference::decode(&raw).map_err(serde::de::Error::custom)
    }
}
