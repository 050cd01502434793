use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Where a candidate was found. Serialized lowercase into the history file and
/// folded into the fingerprint, so the spellings here are part of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Page,
    Script,
    #[serde(alias = "note_title")]
    Title,
    #[serde(alias = "note_content")]
    Content,
    Comment,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Page => "page",
            Source::Script => "script",
            Source::Title => "title",
            Source::Content => "content",
            Source::Comment => "comment",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Script,
    NoteTitle,
}

impl BlockKind {
    pub fn source(self) -> Source {
        match self {
            BlockKind::Paragraph => Source::Page,
            BlockKind::Script => Source::Script,
            BlockKind::NoteTitle => Source::Title,
        }
    }
}

/// A unit of scannable text, rebuilt every pass.
#[derive(Debug, Clone)]
pub struct TextBlock {
    pub id: String,
    pub label: String,
    pub kind: BlockKind,
    pub body: String,
    pub origin_url: String,
}

impl TextBlock {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        kind: BlockKind,
        body: impl Into<String>,
        origin_url: impl Into<String>,
    ) -> Self {
        TextBlock {
            id: id.into(),
            label: label.into(),
            kind,
            body: body.into(),
            origin_url: origin_url.into(),
        }
    }
}

/// A raw pattern hit. `start`/`end` are half-open char offsets into the block body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchSpan {
    pub code: String,
    pub start: usize,
    pub end: usize,
    pub context: String,
    pub rule: &'static str,
}

impl MatchSpan {
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        !(end <= self.start || start >= self.end)
    }
}

/// An accepted match with provenance. This is also the history file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub content: String,
    pub source: Source,
    pub note_id: String,
    pub note_title: String,
    pub note_url: String,
    #[serde(rename = "timestamp", deserialize_with = "local_timestamp")]
    pub discovered_at: DateTime<Local>,
    #[serde(alias = "hash_id")]
    pub fingerprint: String,
    #[serde(default)]
    pub context: String,
}

/// RFC 3339, or a naive ISO 8601 stamp read as local time.
fn local_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(t.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| de::Error::custom(format!("bad timestamp {raw:?}: {e}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| de::Error::custom(format!("timestamp {raw:?} does not exist locally")))
}

impl Candidate {
    pub fn from_span(block: &TextBlock, span: MatchSpan) -> Self {
        let source = block.kind.source();
        let fingerprint = crate::history::fingerprint(&span.code, source, &span.context);
        Candidate {
            content: span.code,
            source,
            note_id: block.id.clone(),
            note_title: block.label.clone(),
            note_url: block.origin_url.clone(),
            discovered_at: Local::now(),
            fingerprint,
            context: span.context,
        }
    }
}
