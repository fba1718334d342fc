//! Section-bounded sentence windows around an anchor mention.

use thiserror::Error;

use super::definition::WindowConfig;
use crate::models::{DocumentLayout, Mention, SentenceId, Span};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    #[error("document {document_id}: section '{section}' has no sentences")]
    EmptySection {
        document_id: String,
        section: String,
    },

    #[error("document {document_id}: sentence {sentence} is missing from the sentence index")]
    UnresolvedSentence {
        document_id: String,
        sentence: String,
    },
}

/// Character range around an anchor. Always inside the anchor's section span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub begin_offset: usize,
    pub end_offset: usize,
}

impl Window {
    pub fn span(&self) -> Span {
        Span::new(self.begin_offset, self.end_offset)
    }

    pub fn contains(&self, mention: &Mention) -> bool {
        self.span().contains(mention.span())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SameSentenceTerm {
    Prefix(String),
    Exact(String),
}

impl SameSentenceTerm {
    fn parse(term: &str) -> Self {
        let lowered = term.trim().to_lowercase();
        match lowered.strip_suffix('*') {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(lowered),
        }
    }

    fn matches(&self, text: &str) -> bool {
        match self {
            Self::Prefix(prefix) => text.starts_with(prefix.as_str()),
            Self::Exact(term) => text == term,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowBuilder {
    same_sentence_terms: Vec<SameSentenceTerm>,
}

impl WindowBuilder {
    pub fn from_config(config: &WindowConfig) -> Self {
        Self {
            same_sentence_terms: config
                .same_sentence_terms
                .iter()
                .map(|t| SameSentenceTerm::parse(t))
                .collect(),
        }
    }

    /// Anchors like "stenosis" only describe their own sentence.
    pub fn forces_same_sentence(&self, anchor: &Mention) -> bool {
        let text = anchor.covered_text.trim().to_lowercase();
        self.same_sentence_terms.iter().any(|t| t.matches(&text))
    }

    /// Window of `sentence_distance` sentences on both sides of the anchor.
    pub fn window(
        &self,
        anchor: &Mention,
        layout: &DocumentLayout,
        sentence_distance: u32,
    ) -> Result<Window, WindowError> {
        self.directed(anchor, layout, sentence_distance, sentence_distance)
    }

    /// Window of `before` sentences ahead of the anchor and `after` sentences behind it.
    pub fn directed(
        &self,
        anchor: &Mention,
        layout: &DocumentLayout,
        before: u32,
        after: u32,
    ) -> Result<Window, WindowError> {
        let (before, after) = if self.forces_same_sentence(anchor) {
            (0, 0)
        } else {
            (before as usize, after as usize)
        };

        let section = anchor.sentence_id.section.as_str();
        let ordinal = anchor.sentence_id.ordinal;
        let last = layout
            .last_ordinal(section)
            .ok_or_else(|| WindowError::EmptySection {
                document_id: layout.document_id.clone(),
                section: section.to_string(),
            })?;

        let first_ordinal = ordinal.saturating_sub(before);
        let last_ordinal = ordinal.saturating_add(after).min(last);

        let begin = boundary(layout, section, first_ordinal)?.begin;
        let end = boundary(layout, section, last_ordinal)?.end;

        let bounds = anchor.section_span;
        let begin_offset = begin.max(bounds.begin).min(bounds.end);
        let end_offset = end.min(bounds.end).max(begin_offset);
        Ok(Window {
            begin_offset,
            end_offset,
        })
    }
}

fn boundary(layout: &DocumentLayout, section: &str, ordinal: usize) -> Result<Span, WindowError> {
    let id = SentenceId::new(section, ordinal);
    layout
        .sentence(&id)
        .map(|s| s.span)
        .ok_or_else(|| WindowError::UnresolvedSentence {
            document_id: layout.document_id.clone(),
            sentence: id.to_string(),
        })
}
