//! Sentence and section boundaries of a single clinical note.
//!
//! Sentence identifiers follow the segmenter's `section:ordinal` convention, where the
//! ordinal counts sentences from zero within the section. Offsets are character offsets
//! into the note text, half-open (`begin..end`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ingest::IngestError;

// ---------------------------------------------------------------------------
// Span
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub begin: usize,
    pub end: usize,
}

impl Span {
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    /// True when `other` lies entirely inside this span.
    pub fn contains(&self, other: Span) -> bool {
        other.begin >= self.begin && other.end <= self.end
    }
}

// ---------------------------------------------------------------------------
// SentenceId
// ---------------------------------------------------------------------------

/// Parsed `section:ordinal` sentence identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SentenceId {
    pub section: String,
    pub ordinal: usize,
}

impl SentenceId {
    pub fn new(section: impl Into<String>, ordinal: usize) -> Self {
        Self {
            section: section.into(),
            ordinal,
        }
    }
}

impl FromStr for SentenceId {
    type Err = IngestError;

    /// Splits on the last `:` so section names that contain colons still parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IngestError::MalformedSentenceId(s.to_string());
        let (section, ordinal) = s.rsplit_once(':').ok_or_else(malformed)?;
        if section.is_empty() {
            return Err(malformed());
        }
        let ordinal = ordinal.trim().parse::<usize>().map_err(|_| malformed())?;
        Ok(Self::new(section, ordinal))
    }
}

impl fmt::Display for SentenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.section, self.ordinal)
    }
}

// ---------------------------------------------------------------------------
// DocumentLayout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SentenceBounds {
    pub span: Span,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionBounds {
    pub id: String,
    pub span: Span,
}

/// Sentence index and section spans for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentLayout {
    pub document_id: String,
    sections: Vec<SectionBounds>,
    sentences: BTreeMap<SentenceId, SentenceBounds>,
}

impl DocumentLayout {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            ..Default::default()
        }
    }

    pub fn add_section(&mut self, id: impl Into<String>, span: Span) {
        self.sections.push(SectionBounds {
            id: id.into(),
            span,
        });
    }

    pub fn add_sentence(&mut self, id: SentenceId, span: Span, text: impl Into<String>) {
        self.sentences.insert(
            id,
            SentenceBounds {
                span,
                text: text.into(),
            },
        );
    }

    pub fn sentence(&self, id: &SentenceId) -> Option<&SentenceBounds> {
        self.sentences.get(id)
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    /// Highest sentence ordinal recorded for a section.
    pub fn last_ordinal(&self, section: &str) -> Option<usize> {
        let lo = SentenceId::new(section, 0);
        let hi = SentenceId::new(section, usize::MAX);
        self.sentences
            .range(lo..=hi)
            .next_back()
            .map(|(id, _)| id.ordinal)
    }

    /// Text after character offset `from` in sentence `id`, then the next sentence of the
    /// same section, each terminated by a newline.
    pub fn following_text(&self, id: &SentenceId, from: usize) -> String {
        let mut out = String::new();
        if let Some(sentence) = self.sentences.get(id) {
            let skip = from.saturating_sub(sentence.span.begin);
            out.extend(sentence.text.chars().skip(skip));
            out.push('\n');
        }
        let next = SentenceId::new(id.section.clone(), id.ordinal.saturating_add(1));
        if let Some(sentence) = self.sentences.get(&next) {
            out.push_str(&sentence.text);
            out.push('\n');
        }
        out
    }

    /// Span of the section `id` enclosing `within`; falls back to the first
    /// section carrying that id when none encloses it.
    pub fn section_span(&self, id: &str, within: Span) -> Option<Span> {
        let mut candidates = self.sections.iter().filter(|s| s.id == id);
        let first = candidates.next()?;
        if first.span.contains(within) {
            return Some(first.span);
        }
        candidates
            .find(|s| s.span.contains(within))
            .map(|s| s.span)
            .or(Some(first.span))
    }
}
